//! Test infrastructure for portfwd
//!
//! Provides:
//! - In-memory forwarding drivers with failure injection
//! - Request fixtures for common add/remove patterns
//! - Captured shell command verification helpers

pub mod fake_driver;
pub mod fixtures;
mod verification;

pub use fake_driver::FakeDriver;
pub use fixtures::*;
pub use verification::*;
