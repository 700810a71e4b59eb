//! Rule identity codec.
//!
//! A rule is identified by `(external port, protocol, method)`. Relay rules
//! encode as `"<port>_<protocol>"` and NAT rules as `"<port>_<protocol>_ipt"`,
//! so a relay and a NAT rule may share a port number. Targets persist as
//! `"<ip>:<port>"` strings; the older `{"ip": .., "toPort": ..}` object form
//! is still accepted on decode.

use std::fmt;

use serde_json::Value;

use portfwd_common::{ForwardingRule, FwdError, FwdResult, Method, Protocol, Target};

/// Key segment separator.
const KEY_SEPARATOR: char = '_';

/// Suffix marking a NAT-backed key.
pub const NAT_KEY_SUFFIX: &str = "ipt";

/// Canonical string identity of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey(String);

impl RuleKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RuleKey> for String {
    fn from(key: RuleKey) -> Self {
        key.0
    }
}

/// Encodes an identity triple into its key.
pub fn encode_key(port: u16, protocol: Protocol, method: Method) -> RuleKey {
    match method {
        Method::Relay => RuleKey(format!("{}{}{}", port, KEY_SEPARATOR, protocol)),
        Method::Nat => RuleKey(format!(
            "{}{}{}{}{}",
            port, KEY_SEPARATOR, protocol, KEY_SEPARATOR, NAT_KEY_SUFFIX
        )),
    }
}

/// Key of an existing rule.
pub fn rule_key(rule: &ForwardingRule) -> RuleKey {
    encode_key(rule.external_port, rule.protocol, rule.method)
}

/// Decodes a key into its identity triple.
///
/// Any shape other than `<port>_<proto>_ipt` decodes as a relay key, as
/// long as the first two segments are a valid port and protocol.
pub fn decode_key(key: &str) -> FwdResult<(u16, Protocol, Method)> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() < 2 {
        return Err(FwdError::store(
            "decode",
            format!("malformed rule key '{}'", key),
        ));
    }

    let method = match parts.as_slice() {
        [_, _, suffix] if *suffix == NAT_KEY_SUFFIX => Method::Nat,
        _ => Method::Relay,
    };

    let port = parse_port(parts[0])
        .ok_or_else(|| FwdError::store("decode", format!("bad port in rule key '{}'", key)))?;
    let protocol: Protocol = parts[1]
        .parse()
        .map_err(|_| FwdError::store("decode", format!("bad protocol in rule key '{}'", key)))?;

    Ok((port, protocol, method))
}

/// Encodes a target into its persisted value.
pub fn encode_target(target: &Target) -> Value {
    Value::String(target.to_string())
}

/// Decodes a persisted target value, in either string or object form.
pub fn decode_target(raw: &Value) -> FwdResult<Target> {
    let (ip, port) = match raw {
        Value::String(s) => {
            let (ip, port) = s.split_once(':').ok_or_else(|| {
                FwdError::store("decode", format!("target '{}' is not ip:port", s))
            })?;
            (ip.to_string(), parse_port(port))
        }
        Value::Object(fields) => {
            let ip = fields
                .get("ip")
                .and_then(Value::as_str)
                .ok_or_else(|| FwdError::store("decode", "target object without ip"))?;
            let port = match fields.get("toPort") {
                Some(Value::String(s)) => parse_port(s),
                Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                _ => None,
            };
            (ip.to_string(), port)
        }
        other => {
            return Err(FwdError::store(
                "decode",
                format!("unsupported target value {}", other),
            ))
        }
    };

    let port = port
        .filter(|p| *p != 0)
        .ok_or_else(|| FwdError::store("decode", format!("bad target port for {}", ip)))?;
    Ok(Target::new(ip, port))
}

/// Decodes a full table entry.
pub fn decode_rule(key: &str, raw: &Value) -> FwdResult<ForwardingRule> {
    let (port, protocol, method) = decode_key(key)?;
    let target = decode_target(raw)?;
    Ok(ForwardingRule::new(port, protocol, method, target))
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key(8080, Protocol::Tcp, Method::Relay).as_str(), "8080_tcp");
        assert_eq!(encode_key(53, Protocol::Udp, Method::Nat).as_str(), "53_udp_ipt");
    }

    #[test]
    fn test_identity_round_trip() {
        for port in [1u16, 53, 8080, 65535] {
            for protocol in [Protocol::Tcp, Protocol::Udp] {
                for method in [Method::Relay, Method::Nat] {
                    let key = encode_key(port, protocol, method);
                    assert_eq!(decode_key(key.as_str()).unwrap(), (port, protocol, method));
                }
            }
        }
    }

    #[test]
    fn test_relay_and_nat_keys_differ() {
        assert_ne!(
            encode_key(8080, Protocol::Tcp, Method::Relay),
            encode_key(8080, Protocol::Tcp, Method::Nat)
        );
    }

    #[test]
    fn test_decode_key_lenient_fallback() {
        assert_eq!(
            decode_key("8080_tcp_xyz").unwrap(),
            (8080, Protocol::Tcp, Method::Relay)
        );
        assert_eq!(
            decode_key("8080_tcp_ipt_extra").unwrap(),
            (8080, Protocol::Tcp, Method::Relay)
        );
    }

    #[test]
    fn test_decode_key_rejects_untyped_segments() {
        assert!(decode_key("8080").is_err());
        assert!(decode_key("http_tcp").is_err());
        assert!(decode_key("8080_sctp").is_err());
        assert!(decode_key("0_tcp").is_err());
    }

    #[test]
    fn test_decode_target_forms_agree() {
        let from_string = decode_target(&json!("10.0.0.5:80")).unwrap();
        let from_object = decode_target(&json!({"ip": "10.0.0.5", "toPort": "80"})).unwrap();
        let from_number = decode_target(&json!({"ip": "10.0.0.5", "toPort": 80})).unwrap();
        assert_eq!(from_string, Target::new("10.0.0.5", 80));
        assert_eq!(from_string, from_object);
        assert_eq!(from_string, from_number);
    }

    #[test]
    fn test_decode_target_rejects_garbage() {
        assert!(decode_target(&json!("10.0.0.5")).is_err());
        assert!(decode_target(&json!("10.0.0.5:http")).is_err());
        assert!(decode_target(&json!({"toPort": "80"})).is_err());
        assert!(decode_target(&json!(42)).is_err());
    }

    #[test]
    fn test_encode_target() {
        assert_eq!(encode_target(&Target::new("10.0.0.5", 80)), json!("10.0.0.5:80"));
    }

    #[test]
    fn test_decode_rule() {
        let rule = decode_rule("53_udp_ipt", &json!("10.0.0.5:5353")).unwrap();
        assert_eq!(
            rule,
            ForwardingRule::new(53, Protocol::Udp, Method::Nat, Target::new("10.0.0.5", 5353))
        );
    }
}
