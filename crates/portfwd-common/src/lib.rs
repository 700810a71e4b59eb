//! Common infrastructure for the portfwd daemon.
//!
//! - [`shell`]: Shell command execution with proper quoting and timeouts
//! - [`types`]: Forwarding rule model ([`Protocol`], [`Method`], [`Target`])
//! - [`driver`]: The [`ForwardDriver`] capability implemented by backends
//! - [`error`]: Error types for forwarding operations

pub mod driver;
pub mod error;
pub mod shell;
pub mod types;

// Re-export commonly used items at crate root
pub use driver::{ForwardDriver, ResourceHandle};
pub use error::{FwdError, FwdResult};
pub use types::{AddRequest, ForwardingRule, Method, Protocol, RemoveRequest, Target};
