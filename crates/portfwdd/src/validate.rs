//! Request validation for the control surface.
//!
//! Checks run in a fixed order and stop at the first failure, whose message
//! is returned to the caller as-is.

use once_cell::sync::Lazy;
use regex::Regex;

use portfwd_common::{
    AddRequest, ForwardingRule, FwdError, FwdResult, Method, Protocol, RemoveRequest, Target,
};

/// Digits and dots only. Octet ranges are not checked.
static IP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9.]+$").expect("Invalid regex pattern"));

static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("Invalid regex pattern"));

/// Validates an add request into the rule it describes.
pub fn validate_add(req: &AddRequest) -> FwdResult<ForwardingRule> {
    let protocol: Protocol = req.protocol.parse()?;
    if !IP_RE.is_match(&req.ip) {
        return Err(FwdError::validation("Invalid IP"));
    }
    let port = parse_port(&req.port, "Invalid port")?;
    let to_port = parse_port(&req.to_port, "Invalid toPort")?;
    let method = parse_method(req.method.as_deref())?;

    Ok(ForwardingRule::new(
        port,
        protocol,
        method,
        Target::new(req.ip.clone(), to_port),
    ))
}

/// Validates a remove request into an identity triple.
pub fn validate_remove(req: &RemoveRequest) -> FwdResult<(u16, Protocol, Method)> {
    let protocol: Protocol = req.protocol.parse()?;
    let port = parse_port(&req.port, "Invalid port")?;
    let method = parse_method(req.method.as_deref())?;
    Ok((port, protocol, method))
}

fn parse_port(raw: &str, message: &str) -> FwdResult<u16> {
    if !PORT_RE.is_match(raw) {
        return Err(FwdError::validation(message));
    }
    raw.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| FwdError::validation(message))
}

/// Absent or empty means relay.
fn parse_method(raw: Option<&str>) -> FwdResult<Method> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Method::default()),
        Some(name) => name.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(ip: &str, port: &str, to_port: &str, protocol: &str, method: Option<&str>) -> AddRequest {
        AddRequest {
            ip: ip.to_string(),
            port: port.to_string(),
            to_port: to_port.to_string(),
            protocol: protocol.to_string(),
            method: method.map(str::to_string),
        }
    }

    fn rejection(req: &AddRequest) -> String {
        validate_add(req).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_add_defaults_to_relay() {
        let rule = validate_add(&add("10.0.0.5", "8080", "80", "TCP", None)).unwrap();
        assert_eq!(rule.external_port, 8080);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.method, Method::Relay);
        assert_eq!(rule.target, Target::new("10.0.0.5", 80));

        let rule = validate_add(&add("10.0.0.5", "8080", "80", "tcp", Some(""))).unwrap();
        assert_eq!(rule.method, Method::Relay);
    }

    #[test]
    fn test_valid_add_nat() {
        let rule = validate_add(&add("10.0.0.5", "53", "5353", "udp", Some("iptables"))).unwrap();
        assert_eq!(rule.method, Method::Nat);
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(rejection(&add("10.0.0.5", "80", "80", "icmp", None)), "Invalid protocol");
        assert_eq!(rejection(&add("", "80", "80", "tcp", None)), "Invalid IP");
        assert_eq!(rejection(&add("host.lan", "80", "80", "tcp", None)), "Invalid IP");
        assert_eq!(rejection(&add("10.0.0.5", "80a", "80", "tcp", None)), "Invalid port");
        assert_eq!(rejection(&add("10.0.0.5", "80", "-1", "tcp", None)), "Invalid toPort");
        assert_eq!(
            rejection(&add("10.0.0.5", "80", "80", "tcp", Some("pf"))),
            "Invalid method"
        );
    }

    #[test]
    fn test_protocol_checked_before_ip() {
        assert_eq!(rejection(&add("bad ip", "x", "y", "", None)), "Invalid protocol");
    }

    #[test]
    fn test_lenient_ip_pattern() {
        assert!(validate_add(&add("999.1.2.3", "80", "80", "tcp", None)).is_ok());
    }

    #[test]
    fn test_port_range() {
        assert_eq!(rejection(&add("10.0.0.5", "0", "80", "tcp", None)), "Invalid port");
        assert_eq!(rejection(&add("10.0.0.5", "65536", "80", "tcp", None)), "Invalid port");
        assert!(validate_add(&add("10.0.0.5", "65535", "1", "tcp", None)).is_ok());
    }

    #[test]
    fn test_validate_remove() {
        let req = RemoveRequest {
            port: "9999".to_string(),
            protocol: "TCP".to_string(),
            method: None,
        };
        assert_eq!(validate_remove(&req).unwrap(), (9999, Protocol::Tcp, Method::Relay));

        let req = RemoveRequest {
            port: "9999".to_string(),
            protocol: "gre".to_string(),
            method: None,
        };
        assert!(validate_remove(&req).unwrap_err().is_validation());
    }
}
