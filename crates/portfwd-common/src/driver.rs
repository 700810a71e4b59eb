//! Backend driver capability interface.
//!
//! A driver turns one [`ForwardingRule`] into a live OS resource and back.
//! Drivers hold no per-rule state: whatever they need to undo an install is
//! returned as a [`ResourceHandle`] and owned by the caller's registry.

use async_trait::async_trait;

use crate::error::FwdResult;
use crate::types::{ForwardingRule, Method};

/// Handle to the live resource backing an installed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// A relay process, addressed by its pid.
    Process { pid: u32 },
    /// A kernel rule. Removal is re-derived from the rule's own fields.
    KernelRule,
}

impl ResourceHandle {
    /// Returns the pid for process-backed handles.
    pub fn pid(&self) -> Option<u32> {
        match self {
            ResourceHandle::Process { pid } => Some(*pid),
            ResourceHandle::KernelRule => None,
        }
    }
}

/// Install/remove capability implemented by every forwarding backend.
///
/// # Error policy
///
/// `install` is strict: an `Err` means nothing was left behind and the
/// caller must not record the rule. `remove` errors are advisory; callers
/// log them and proceed with their own bookkeeping.
#[async_trait]
pub trait ForwardDriver: Send + Sync {
    /// The method this driver implements.
    fn method(&self) -> Method;

    /// Creates the live resource for `rule`.
    async fn install(&self, rule: &ForwardingRule) -> FwdResult<ResourceHandle>;

    /// Releases the live resource for `rule`.
    ///
    /// `handle` is whatever the registry holds for the rule, if anything.
    async fn remove(&self, rule: &ForwardingRule, handle: Option<ResourceHandle>)
        -> FwdResult<()>;

    /// Whether the resource behind `handle` is still up. Backends that
    /// cannot observe their resources report true.
    fn is_running(&self, _handle: &ResourceHandle) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_handle_pid() {
        assert_eq!(ResourceHandle::Process { pid: 42 }.pid(), Some(42));
        assert_eq!(ResourceHandle::KernelRule.pid(), None);
    }
}
