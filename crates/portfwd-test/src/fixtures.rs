//! Request fixtures for common control-surface patterns

use portfwd_common::{AddRequest, Method, RemoveRequest};

/// Add request with an explicit method name (`None` leaves the field absent)
pub fn add(ip: &str, port: &str, to_port: &str, protocol: &str, method: Option<&str>) -> AddRequest {
    AddRequest {
        ip: ip.to_string(),
        port: port.to_string(),
        to_port: to_port.to_string(),
        protocol: protocol.to_string(),
        method: method.map(str::to_string),
    }
}

/// Relay add request, relying on the default method
pub fn add_relay(ip: &str, port: &str, to_port: &str, protocol: &str) -> AddRequest {
    add(ip, port, to_port, protocol, None)
}

/// NAT add request
pub fn add_nat(ip: &str, port: &str, to_port: &str, protocol: &str) -> AddRequest {
    add(ip, port, to_port, protocol, Some(Method::Nat.as_str()))
}

/// Remove request
pub fn remove(port: &str, protocol: &str, method: Option<&str>) -> RemoveRequest {
    RemoveRequest {
        port: port.to_string(),
        protocol: protocol.to_string(),
        method: method.map(str::to_string),
    }
}

/// A sequence of add/remove requests replayed against a manager
#[derive(Debug, Default)]
pub struct TestScenario {
    /// Scenario name
    pub name: String,
    /// Requests in order
    pub steps: Vec<Step>,
}

/// One scenario step
#[derive(Debug, Clone)]
pub enum Step {
    Add(AddRequest),
    Remove(RemoveRequest),
}

impl TestScenario {
    /// Create a new test scenario
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append an add step
    pub fn add(mut self, req: AddRequest) -> Self {
        self.steps.push(Step::Add(req));
        self
    }

    /// Append a remove step
    pub fn remove(mut self, req: RemoveRequest) -> Self {
        self.steps.push(Step::Remove(req));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_fixtures() {
        let req = add_relay("10.0.0.5", "8080", "80", "tcp");
        assert_eq!(req.method, None);
        assert_eq!(req.to_port, "80");

        let req = add_nat("10.0.0.5", "53", "5353", "udp");
        assert_eq!(req.method.as_deref(), Some("iptables"));
    }

    #[test]
    fn test_scenario_builder() {
        let scenario = TestScenario::new("add then remove")
            .add(add_relay("10.0.0.5", "8080", "80", "tcp"))
            .remove(remove("8080", "tcp", None));

        assert_eq!(scenario.name, "add then remove");
        assert_eq!(scenario.steps.len(), 2);
        assert!(matches!(scenario.steps[1], Step::Remove(_)));
    }
}
