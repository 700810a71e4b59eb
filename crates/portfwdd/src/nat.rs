//! NAT driver - kernel DNAT rules via iptables

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use portfwd_common::{
    shell, ForwardDriver, ForwardingRule, FwdResult, Method, ResourceHandle,
};

use crate::commands::{build_nat_add_cmd, build_nat_del_cmd};

/// NAT driver
///
/// Appends one `PREROUTING` DNAT rule per forwarding rule. Install is strict:
/// any failure of the iptables invocation is returned to the caller. Nothing
/// is kept per rule; removal re-derives the delete command from the rule.
pub struct NatDriver {
    /// Path to the iptables binary
    iptables_cmd: String,

    /// Public address matched by `-d`
    public_ip: String,

    /// Upper bound on a single iptables invocation
    command_timeout: Duration,

    /// Testing support
    #[cfg(test)]
    mock: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    enabled: bool,
    fail_matching: Option<String>,
    captured_commands: Vec<String>,
}

impl NatDriver {
    /// Create a new NatDriver
    pub fn new(
        iptables_cmd: impl Into<String>,
        public_ip: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            iptables_cmd: iptables_cmd.into(),
            public_ip: public_ip.into(),
            command_timeout,
            #[cfg(test)]
            mock: std::sync::Mutex::new(MockState::default()),
        }
    }

    /// Public address DNAT rules match on
    pub fn public_ip(&self) -> &str {
        &self.public_ip
    }

    /// Execute shell command (with mock mode support)
    async fn exec(&self, cmd: &str) -> FwdResult<String> {
        #[cfg(test)]
        {
            let mut mock = self.mock.lock().unwrap();
            if mock.enabled {
                mock.captured_commands.push(cmd.to_string());
                if let Some(pattern) = &mock.fail_matching {
                    if cmd.contains(pattern.as_str()) {
                        return Err(portfwd_common::FwdError::ShellCommandFailed {
                            command: cmd.to_string(),
                            exit_code: 2,
                            output: "iptables: Bad rule".to_string(),
                        });
                    }
                }
                return Ok(String::new());
            }
        }

        shell::exec_or_throw_with_timeout(cmd, self.command_timeout).await
    }

    #[cfg(test)]
    pub fn with_mock_mode(self) -> Self {
        self.mock.lock().unwrap().enabled = true;
        self
    }

    #[cfg(test)]
    pub fn failing_commands_containing(self, pattern: &str) -> Self {
        self.mock.lock().unwrap().fail_matching = Some(pattern.to_string());
        self
    }

    #[cfg(test)]
    pub fn captured_commands(&self) -> Vec<String> {
        self.mock.lock().unwrap().captured_commands.clone()
    }
}

#[async_trait]
impl ForwardDriver for NatDriver {
    fn method(&self) -> Method {
        Method::Nat
    }

    #[instrument(skip(self), fields(rule = %rule))]
    async fn install(&self, rule: &ForwardingRule) -> FwdResult<ResourceHandle> {
        let cmd = build_nat_add_cmd(&self.iptables_cmd, &self.public_ip, rule);
        self.exec(&cmd).await?;
        info!(
            "Added iptables forward {} {} => {}",
            rule.protocol, rule.external_port, rule.target
        );
        Ok(ResourceHandle::KernelRule)
    }

    #[instrument(skip(self, _handle), fields(rule = %rule))]
    async fn remove(
        &self,
        rule: &ForwardingRule,
        _handle: Option<ResourceHandle>,
    ) -> FwdResult<()> {
        let cmd = build_nat_del_cmd(&self.iptables_cmd, &self.public_ip, rule);
        match self.exec(&cmd).await {
            Ok(_) => {
                info!(
                    "Removed iptables forward {} {} => {}",
                    rule.protocol, rule.external_port, rule.target
                );
                Ok(())
            }
            Err(e) => {
                warn!("iptables delete failed: {}", e);
                Err(e)
            }
        }
    }
}
