//! Forwarding rule types shared by the drivers and the reconciler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FwdError;

/// Transport protocol of a forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Lowercase name, as used in identity keys and iptables `-p`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Uppercase name, as used in socat address specs.
    pub fn relay_name(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(FwdError::validation("Invalid protocol")),
        }
    }
}

/// Backend used to realize a forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    /// A dedicated relay process per rule.
    #[default]
    #[serde(rename = "socat")]
    Relay,
    /// A kernel DNAT rule per rule.
    #[serde(rename = "iptables")]
    Nat,
}

impl Method {
    /// Name used by the control surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Relay => "socat",
            Method::Nat => "iptables",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socat" | "relay" => Ok(Method::Relay),
            "iptables" | "nat" => Ok(Method::Nat),
            _ => Err(FwdError::validation("Invalid method")),
        }
    }
}

/// Destination of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Destination address (dotted quad).
    pub ip: String,
    /// Destination port.
    #[serde(rename = "toPort")]
    pub port: u16,
}

impl Target {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A single entry of the desired-state table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// Port listened on / matched on this host.
    #[serde(rename = "port")]
    pub external_port: u16,
    pub protocol: Protocol,
    pub method: Method,
    #[serde(flatten)]
    pub target: Target,
}

impl ForwardingRule {
    pub fn new(external_port: u16, protocol: Protocol, method: Method, target: Target) -> Self {
        Self {
            external_port,
            protocol,
            method,
            target,
        }
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} => {} via {}",
            self.protocol, self.external_port, self.target, self.method
        )
    }
}

/// Raw add request as received from the control surface.
///
/// Every field is text; see `portfwdd::validate` for the accepted shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: String,
    #[serde(default, rename = "toPort")]
    pub to_port: String,
    #[serde(default)]
    pub protocol: String,
    /// Backend method name; relay when absent or empty.
    #[serde(default)]
    pub method: Option<String>,
}

/// Raw remove request as received from the control surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRequest {
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub method: Option<String>,
}
