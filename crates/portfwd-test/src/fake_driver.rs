//! In-memory forwarding driver
//!
//! Models the observable behavior of the real backends without touching
//! the OS:
//! - relay removal only takes effect with a tracked process handle
//! - NAT removal deletes one matching kernel rule, if any
//!
//! Clones share state, so a test can keep one clone for inspection while
//! the manager owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use portfwd_common::{ForwardDriver, ForwardingRule, FwdError, FwdResult, Method, ResourceHandle};

/// First pid handed out by relay fakes
const FIRST_FAKE_PID: u32 = 40_000;

#[derive(Debug, Default)]
struct FakeState {
    live: HashMap<String, usize>,
    events: Vec<String>,
    installs: usize,
    next_pid: u32,
    install_failure: Option<String>,
    remove_failure: Option<String>,
}

/// Fake backend driver
#[derive(Debug, Clone)]
pub struct FakeDriver {
    method: Method,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    /// Create a fake for `method`
    pub fn new(method: Method) -> Self {
        Self {
            method,
            state: Arc::new(Mutex::new(FakeState {
                next_pid: FIRST_FAKE_PID,
                ..FakeState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every following install fail with `output`
    pub fn fail_installs(&self, output: impl Into<String>) {
        self.state().install_failure = Some(output.into());
    }

    /// Make every following remove fail with `output`
    pub fn fail_removes(&self, output: impl Into<String>) {
        self.state().remove_failure = Some(output.into());
    }

    /// Clear injected failures
    pub fn heal(&self) {
        let mut state = self.state();
        state.install_failure = None;
        state.remove_failure = None;
    }

    /// Total live resources, counting duplicates
    pub fn live_count(&self) -> usize {
        self.state().live.values().sum()
    }

    /// Live resources for one rule label (e.g. `"8080_tcp"`)
    pub fn live_count_for(&self, label: &str) -> usize {
        self.state().live.get(label).copied().unwrap_or(0)
    }

    /// Successful installs so far
    pub fn install_count(&self) -> usize {
        self.state().installs
    }

    /// Every install/remove call, as `"<op> <label>"`
    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    /// Calls rendered as commands, for [`crate::CommandVerifier`]
    pub fn captured_commands(&self) -> Vec<String> {
        self.events()
    }

    fn label(&self, rule: &ForwardingRule) -> String {
        match self.method {
            Method::Relay => format!("{}_{}", rule.external_port, rule.protocol),
            Method::Nat => format!("{}_{}_ipt", rule.external_port, rule.protocol),
        }
    }

    fn failure(command: String, output: &str) -> FwdError {
        FwdError::ShellCommandFailed {
            command,
            exit_code: 1,
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl ForwardDriver for FakeDriver {
    fn method(&self) -> Method {
        self.method
    }

    async fn install(&self, rule: &ForwardingRule) -> FwdResult<ResourceHandle> {
        let label = self.label(rule);
        let mut state = self.state();
        state.events.push(format!("install {}", label));

        if let Some(output) = &state.install_failure {
            return Err(Self::failure(format!("fake install {}", label), output));
        }

        *state.live.entry(label).or_insert(0) += 1;
        state.installs += 1;

        match self.method {
            Method::Relay => {
                let pid = state.next_pid;
                state.next_pid += 1;
                Ok(ResourceHandle::Process { pid })
            }
            Method::Nat => Ok(ResourceHandle::KernelRule),
        }
    }

    async fn remove(&self, rule: &ForwardingRule, handle: Option<ResourceHandle>) -> FwdResult<()> {
        let label = self.label(rule);
        let mut state = self.state();
        state.events.push(format!("remove {}", label));

        if let Some(output) = &state.remove_failure {
            return Err(Self::failure(format!("fake remove {}", label), output));
        }

        let effective = match self.method {
            Method::Relay => handle.and_then(|h| h.pid()).is_some(),
            Method::Nat => true,
        };
        if effective {
            if let Some(count) = state.live.get_mut(&label) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }
}
