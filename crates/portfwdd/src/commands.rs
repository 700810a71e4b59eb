//! Command builders for the forwarding backends

use portfwd_common::shell;
use portfwd_common::ForwardingRule;

/// NAT table used for DNAT rules
pub const NAT_TABLE: &str = "nat";

/// Chain DNAT rules are attached to
pub const NAT_CHAIN: &str = "PREROUTING";

/// Address the relay listens on
pub const RELAY_BIND_ADDR: &str = "0.0.0.0";

/// Build DNAT append command
///
/// Rewrites traffic addressed to `public_ip:<external port>` to the rule's target
pub fn build_nat_add_cmd(iptables: &str, public_ip: &str, rule: &ForwardingRule) -> String {
    build_nat_cmd(iptables, "-A", public_ip, rule)
}

/// Build DNAT delete command
///
/// Must match the append command field for field, or iptables will not find the rule
pub fn build_nat_del_cmd(iptables: &str, public_ip: &str, rule: &ForwardingRule) -> String {
    build_nat_cmd(iptables, "-D", public_ip, rule)
}

fn build_nat_cmd(iptables: &str, action: &str, public_ip: &str, rule: &ForwardingRule) -> String {
    format!(
        "{} -t {} {} {} -p {} -d {} --dport {} -j DNAT --to-destination {}",
        iptables,
        NAT_TABLE,
        action,
        NAT_CHAIN,
        rule.protocol,
        shell::shellquote(public_ip),
        rule.external_port,
        shell::shellquote(&rule.target.to_string())
    )
}

/// Build relay argument list
///
/// Listens on all interfaces, forking per connection, and connects each
/// accepted connection to the target.
pub fn build_relay_args(rule: &ForwardingRule) -> Vec<String> {
    let proto = rule.protocol.relay_name();
    vec![
        format!(
            "{}-LISTEN:{},bind={},reuseaddr,fork",
            proto, rule.external_port, RELAY_BIND_ADDR
        ),
        format!("{}:{}:{},reuseaddr", proto, rule.target.ip, rule.target.port),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfwd_common::{Method, Protocol, Target};

    fn nat_rule() -> ForwardingRule {
        ForwardingRule::new(53, Protocol::Udp, Method::Nat, Target::new("10.0.0.5", 5353))
    }

    #[test]
    fn test_build_nat_add_cmd() {
        let cmd = build_nat_add_cmd("/sbin/iptables", "203.0.113.7", &nat_rule());
        assert_eq!(
            cmd,
            "/sbin/iptables -t nat -A PREROUTING -p udp -d \"203.0.113.7\" --dport 53 \
             -j DNAT --to-destination \"10.0.0.5:5353\""
        );
    }

    #[test]
    fn test_build_nat_del_cmd_mirrors_add() {
        let add = build_nat_add_cmd("/sbin/iptables", "203.0.113.7", &nat_rule());
        let del = build_nat_del_cmd("/sbin/iptables", "203.0.113.7", &nat_rule());
        assert_eq!(add.replacen(" -A ", " -D ", 1), del);
    }

    #[test]
    fn test_build_relay_args_tcp() {
        let rule = ForwardingRule::new(8080, Protocol::Tcp, Method::Relay, Target::new("10.0.0.5", 80));
        assert_eq!(
            build_relay_args(&rule),
            vec![
                "TCP-LISTEN:8080,bind=0.0.0.0,reuseaddr,fork".to_string(),
                "TCP:10.0.0.5:80,reuseaddr".to_string(),
            ]
        );
    }

    #[test]
    fn test_build_relay_args_udp() {
        let rule = ForwardingRule::new(5000, Protocol::Udp, Method::Relay, Target::new("10.0.0.9", 5001));
        let args = build_relay_args(&rule);
        assert!(args[0].starts_with("UDP-LISTEN:5000"));
        assert!(args[1].starts_with("UDP:10.0.0.9:5001"));
    }

    #[test]
    fn test_shellquote_safety() {
        let rule = ForwardingRule::new(80, Protocol::Tcp, Method::Nat, Target::new("1.2.3.4", 80));
        let cmd = build_nat_add_cmd("/sbin/iptables", "1.2.3.4$(reboot)", &rule);
        assert!(cmd.contains("\"1.2.3.4\\$(reboot)\""));
    }
}
