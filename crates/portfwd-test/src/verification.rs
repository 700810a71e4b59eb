//! Verification helpers for captured commands

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected a command containing '{expected}', got {actual:?}")]
    CommandMissing {
        expected: String,
        actual: Vec<String>,
    },

    #[error("Unexpected command containing '{unexpected}'")]
    UnexpectedCommand { unexpected: String },

    #[error("Expected {expected} commands, found {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Command execution verifier (for mock mode)
pub struct CommandVerifier {
    captured_commands: Vec<String>,
}

impl CommandVerifier {
    /// Create a new command verifier
    pub fn new(captured_commands: Vec<String>) -> Self {
        Self { captured_commands }
    }

    /// Verify that a specific command was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        if self
            .captured_commands
            .iter()
            .any(|cmd| cmd.contains(expected))
        {
            Ok(())
        } else {
            Err(VerificationError::CommandMissing {
                expected: expected.to_string(),
                actual: self.captured_commands.clone(),
            })
        }
    }

    /// Verify that a command was NOT executed
    pub fn assert_command_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        if self
            .captured_commands
            .iter()
            .any(|cmd| cmd.contains(unexpected))
        {
            Err(VerificationError::UnexpectedCommand {
                unexpected: unexpected.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Verify the number of commands executed
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured_commands.len();
        if actual != expected {
            Err(VerificationError::CountMismatch { expected, actual })
        } else {
            Ok(())
        }
    }

    /// Verify that `first` ran before `second`
    pub fn assert_command_order(&self, first: &str, second: &str) -> VerifyResult<()> {
        let position = |needle: &str| {
            self.captured_commands
                .iter()
                .position(|cmd| cmd.contains(needle))
                .ok_or_else(|| VerificationError::CommandMissing {
                    expected: needle.to_string(),
                    actual: self.captured_commands.clone(),
                })
        };
        let (a, b) = (position(first)?, position(second)?);
        if a < b {
            Ok(())
        } else {
            Err(VerificationError::UnexpectedCommand {
                unexpected: format!("'{}' before '{}'", second, first),
            })
        }
    }

    /// Get all captured commands
    pub fn captured_commands(&self) -> &[String] {
        &self.captured_commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_verifier() {
        let commands = vec![
            "/sbin/iptables -t nat -D PREROUTING -p tcp".to_string(),
            "/sbin/iptables -t nat -A PREROUTING -p tcp".to_string(),
        ];

        let verifier = CommandVerifier::new(commands);

        assert!(verifier.assert_command_executed("-A PREROUTING").is_ok());
        assert!(verifier.assert_command_not_executed("-F").is_ok());
        assert!(verifier.assert_command_count(2).is_ok());
        assert!(verifier.assert_command_order("-D", "-A").is_ok());

        assert!(verifier.assert_command_count(3).is_err());
        assert!(verifier.assert_command_executed("nonexistent").is_err());
        assert!(verifier.assert_command_order("-A", "-D").is_err());
    }
}
