//! Relay driver - one supervised socat process per rule.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use portfwd_common::{ForwardDriver, ForwardingRule, FwdError, FwdResult, Method, ResourceHandle};

use crate::commands::build_relay_args;
use crate::keys::rule_key;

/// Stop request sent to a supervisor; answered once the relay has exited.
type StopRequest = oneshot::Sender<FwdResult<()>>;

/// Running relays by pid. An entry exists only while the supervisor still
/// owns the unreaped child.
type Supervisors = Arc<Mutex<HashMap<u32, oneshot::Sender<StopRequest>>>>;

/// Relay driver.
///
/// Every install spawns a fresh process; nothing is reused. The child is
/// owned by a supervisor task for its whole life, and only that task ever
/// signals it, so a pid is never signalled after it has been reaped.
#[derive(Clone)]
pub struct RelayDriver {
    /// Relay program (socat-compatible argument syntax).
    program: String,

    /// How long a fresh relay must stay up before install succeeds.
    /// Zero skips the check.
    startup_grace: Duration,

    supervisors: Supervisors,
}

impl RelayDriver {
    pub fn new(program: impl Into<String>, startup_grace: Duration) -> Self {
        Self {
            program: program.into(),
            startup_grace,
            supervisors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of relays currently running.
    pub fn running(&self) -> usize {
        lock(&self.supervisors).len()
    }

    /// Waits out the grace period, failing if the relay exits inside it.
    async fn check_alive(&self, child: &mut Child, rule: &ForwardingRule) -> FwdResult<()> {
        if self.startup_grace.is_zero() {
            return Ok(());
        }

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Err(_) => Ok(()),
            Ok(Ok(status)) => Err(FwdError::RelayExited {
                key: rule_key(rule).to_string(),
                status: status.to_string(),
            }),
            Ok(Err(e)) => Err(FwdError::internal(format!(
                "failed to poll relay for {}: {}",
                rule_key(rule),
                e
            ))),
        }
    }
}

fn lock(supervisors: &Supervisors) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<StopRequest>>> {
    supervisors.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ForwardDriver for RelayDriver {
    fn method(&self) -> Method {
        Method::Relay
    }

    #[instrument(skip(self), fields(rule = %rule))]
    async fn install(&self, rule: &ForwardingRule) -> FwdResult<ResourceHandle> {
        let args = build_relay_args(rule);
        debug!(program = %self.program, ?args, "Spawning relay");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FwdError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| FwdError::internal("relay exited before its pid was read"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        self.check_alive(&mut child, rule).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        lock(&self.supervisors).insert(pid, stop_tx);
        tokio::spawn(supervise(child, pid, stop_rx, self.supervisors.clone()));

        info!(
            "Started relay for {} port {} with pid {}",
            rule.protocol.relay_name(),
            rule.external_port,
            pid
        );
        Ok(ResourceHandle::Process { pid })
    }

    /// Stops the relay and waits for it to exit.
    #[instrument(skip(self, handle), fields(rule = %rule))]
    async fn remove(&self, rule: &ForwardingRule, handle: Option<ResourceHandle>) -> FwdResult<()> {
        let Some(pid) = handle.and_then(|h| h.pid()) else {
            debug!("No relay tracked for {}", rule_key(rule));
            return Ok(());
        };

        let Some(stop) = lock(&self.supervisors).remove(&pid) else {
            debug!("Relay pid {} is no longer running", pid);
            return Ok(());
        };

        let (done_tx, done_rx) = oneshot::channel();
        if stop.send(done_tx).is_err() {
            debug!("Relay pid {} exited before it was stopped", pid);
            return Ok(());
        }

        match done_rx.await {
            Ok(Ok(())) => {
                info!("Stopped relay for {} with pid {}", rule.external_port, pid);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(()),
        }
    }

    fn is_running(&self, handle: &ResourceHandle) -> bool {
        handle
            .pid()
            .is_some_and(|pid| lock(&self.supervisors).contains_key(&pid))
    }
}

/// Forwards relay output lines to the log.
async fn forward_output<R>(stream: R, pid: u32, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if name == "stderr" => warn!(pid, "{} {}: {}", name, pid, line),
            Ok(Some(line)) => info!(pid, "{} {}: {}", name, pid, line),
            Ok(None) => break,
            Err(e) => {
                debug!(pid, "Relay {} closed: {}", name, e);
                break;
            }
        }
    }
}

/// Owns the relay until it exits, either on its own or on a stop request.
async fn supervise(
    mut child: Child,
    pid: u32,
    mut stop_rx: oneshot::Receiver<StopRequest>,
    supervisors: Supervisors,
) {
    tokio::select! {
        status = child.wait() => {
            // Only drop our own entry; the pid may already belong to a newer relay.
            drop(stop_rx);
            let mut running = lock(&supervisors);
            if running.get(&pid).is_some_and(|stop| stop.is_closed()) {
                running.remove(&pid);
            }
            drop(running);
            match status {
                Ok(status) => warn!(pid, "Relay pid {} exited on its own: {}", pid, status),
                Err(e) => warn!(pid, "Failed to wait on relay pid {}: {}", pid, e),
            }
        }
        request = &mut stop_rx => {
            let Ok(done) = request else {
                reap(child, pid).await;
                return;
            };
            // Not yet reaped, so the pid still names our child.
            match signal_relay(pid) {
                Ok(()) => {
                    reap(child, pid).await;
                    let _ = done.send(Ok(()));
                }
                Err(e) => {
                    let _ = done.send(Err(e));
                    reap(child, pid).await;
                }
            }
        }
    }
}

fn signal_relay(pid: u32) -> FwdResult<()> {
    let raw = i32::try_from(pid).map_err(|_| FwdError::Signal {
        pid,
        message: "pid out of range".to_string(),
    })?;

    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(FwdError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

async fn reap(mut child: Child, pid: u32) {
    match child.wait().await {
        Ok(status) => debug!(pid, "Relay pid {} exited: {}", pid, status),
        Err(e) => warn!(pid, "Failed to wait on relay pid {}: {}", pid, e),
    }
}
