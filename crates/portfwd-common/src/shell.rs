//! Shell command execution utilities.
//!
//! Commands are run through `/bin/sh -c` and every caller-supplied argument
//! is passed through [`shellquote`] first so that table contents can never
//! inject extra shell syntax.
//!
//! # Example
//!
//! ```ignore
//! use portfwd_common::shell::{self, IPTABLES_CMD, shellquote};
//!
//! let cmd = format!("{} -t nat -S PREROUTING", IPTABLES_CMD);
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{FwdError, FwdResult};

/// Path to the shell used to run command strings.
pub const SH_CMD: &str = "/bin/sh";

/// Path to the `iptables` command for NAT rules.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Path to the `socat` relay binary.
pub const SOCAT_CMD: &str = "/usr/bin/socat";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\`
/// and newline.
///
/// ```
/// use portfwd_common::shell::shellquote;
///
/// assert_eq!(shellquote("10.0.0.5"), "\"10.0.0.5\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The combined stdout output.
    pub stdout: String,
    /// The combined stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a shell command asynchronously.
///
/// Returns `Err` only when the shell itself could not be spawned; a
/// non-zero exit is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> FwdResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FwdError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command, giving up after `timeout`.
///
/// The child is killed when the timeout elapses.
pub async fn exec_with_timeout(cmd: &str, timeout: Duration) -> FwdResult<ExecResult> {
    match tokio::time::timeout(timeout, exec(cmd)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(command = %cmd, ?timeout, "Command timed out");
            Err(FwdError::CommandTimeout {
                command: cmd.to_string(),
                timeout,
            })
        }
    }
}

/// Executes a shell command and returns an error on non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> FwdResult<String> {
    into_stdout(cmd, exec(cmd).await?)
}

/// Bounded variant of [`exec_or_throw`].
pub async fn exec_or_throw_with_timeout(cmd: &str, timeout: Duration) -> FwdResult<String> {
    into_stdout(cmd, exec_with_timeout(cmd, timeout).await?)
}

fn into_stdout(cmd: &str, result: ExecResult) -> FwdResult<String> {
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(FwdError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("10.0.0.5:80"), "\"10.0.0.5:80\"");
        assert_eq!(shellquote("8080"), "\"8080\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let result = ExecResult {
            exit_code: 1,
            stdout: "".to_string(),
            stderr: "error message".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "error message");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("echo nope >&2; exit 1").await {
            Err(FwdError::ShellCommandFailed {
                exit_code, output, ..
            }) => {
                assert_eq!(exit_code, 1);
                assert_eq!(output, "nope");
            }
            other => panic!("Expected ShellCommandFailed error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_with_timeout_expires() {
        let result = exec_with_timeout("sleep 5", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(FwdError::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn test_exec_or_throw_with_timeout_success() {
        let output = exec_or_throw_with_timeout("echo success", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output, "success");
    }
}
