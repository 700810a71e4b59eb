//! Error types for port-forwarding operations.
//!
//! This module defines the error types used throughout the portfwd crates.
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for port-forwarding operations.
pub type FwdResult<T> = Result<T, FwdError>;

/// Errors that can occur while managing forwarding rules.
#[derive(Debug, Error)]
pub enum FwdError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Shell command did not finish within the configured bound.
    #[error("Shell command timed out after {timeout:?}: '{command}'")]
    CommandTimeout {
        /// The command that was abandoned.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The relay process could not be spawned.
    #[error("Failed to spawn relay '{program}': {source}")]
    SpawnFailed {
        /// The relay program path.
        program: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The relay process exited during its startup grace period.
    #[error("Relay for {key} exited during startup: {status}")]
    RelayExited {
        /// Identity key of the rule.
        key: String,
        /// Human-readable exit status.
        status: String,
    },

    /// Sending a signal to a relay process failed.
    #[error("Failed to signal pid {pid}: {message}")]
    Signal {
        /// The target process id.
        pid: u32,
        /// Error message.
        message: String,
    },

    /// Request input failed validation. Displays as the bare message.
    #[error("{message}")]
    Validation {
        /// Human-readable rejection message.
        message: String,
    },

    /// Desired-state store could not be read or written.
    #[error("Store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g., "load", "save").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl FwdError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FwdError::CommandTimeout { .. }
                | FwdError::ShellCommandFailed { .. }
                | FwdError::Store { .. }
        )
    }

    /// Returns true if the error was caused by bad caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, FwdError::Validation { .. })
    }
}
