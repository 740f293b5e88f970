// ABOUTME: Spawns worker child processes and watches them until they exit.
// ABOUTME: Forwards worker output with an identity prefix and reports exits to the supervisor.

use crate::error::LaunchError;
use crate::registry::WorkerHandle;
use async_trait::async_trait;
use fleet_core::{LaunchSpec, WorkerConfig, WorkerEnv, WorkerIdentity};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

/// Reported once for every launched process when it is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub identity: WorkerIdentity,
    pub generation: u64,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// True when the supervisor asked for the stop.
    pub requested: bool,
}

impl ExitEvent {
    fn from_status(
        identity: WorkerIdentity,
        generation: u64,
        status: ExitStatus,
        requested: bool,
    ) -> Self {
        Self {
            identity,
            generation,
            code: status.code(),
            signal: exit_signal(&status),
            requested,
        }
    }
}

pub type ExitSender = mpsc::UnboundedSender<ExitEvent>;

#[async_trait]
pub trait Launcher: Send {
    /// Start a worker for `spec`. The returned handle is tagged with
    /// `generation`, and an [`ExitEvent`] with the same generation is sent on
    /// `exits` when the process ends.
    async fn spawn(
        &mut self,
        spec: &LaunchSpec,
        generation: u64,
        exits: ExitSender,
    ) -> Result<WorkerHandle, LaunchError>;
}

/// Launches workers as OS processes.
pub struct ProcessLauncher {
    worker: WorkerConfig,
}

impl ProcessLauncher {
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }

    /// Build the command for one worker: inherited env plus overrides, with
    /// configured secrets removed.
    pub fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(self.worker.program_expanded());
        cmd.args(&self.worker.args);

        if let Some(dir) = self.worker.working_dir_expanded() {
            cmd.current_dir(dir);
        }

        let env = WorkerEnv::for_spec(spec, &self.worker);
        for name in &env.remove {
            cmd.env_remove(name);
        }
        for (name, value) in &env.set {
            cmd.env(name, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(
        &mut self,
        spec: &LaunchSpec,
        generation: u64,
        exits: ExitSender,
    ) -> Result<WorkerHandle, LaunchError> {
        let identity = spec.identity.clone();
        let mut child = self
            .command(spec)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                identity: identity.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(identity = %identity, pid = ?pid, generation, "Spawned worker");

        // Forward stdout/stderr with a short identity prefix
        let prefix = identity.short().to_string();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, prefix.clone(), Stream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, prefix, Stream::Stderr);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(watch_child(
            child,
            identity,
            generation,
            stop_rx,
            self.worker.stop_timeout(),
            exits,
        ));

        Ok(WorkerHandle::new(spec.clone(), pid, generation, stop_tx))
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn forward_lines<R>(reader: R, prefix: String, stream: Stream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = prefixed_line(&prefix, &buf);
                    match stream {
                        Stream::Stdout => println!("{}", line),
                        Stream::Stderr => eprintln!("{}", line),
                    }
                }
                Err(e) => {
                    // Keep the pipe open so the worker never sees a closed stdout
                    tracing::debug!(prefix = %prefix, error = %e, "Worker output unreadable, discarding the rest");
                    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    break;
                }
            }
        }
    });
}

/// Format one raw output line as `[prefix] line`, replacing invalid UTF-8.
pub fn prefixed_line(prefix: &str, raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    format!("[{}] {}", prefix, String::from_utf8_lossy(raw))
}

/// Owns the child until it exits, terminating it on request.
async fn watch_child(
    mut child: Child,
    identity: WorkerIdentity,
    generation: u64,
    mut stop_rx: oneshot::Receiver<()>,
    stop_timeout: Option<Duration>,
    exits: ExitSender,
) {
    // A dropped handle counts as a stop request
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut stop_rx => None,
    };

    let (status, requested) = match exited {
        Some(status) => (status, false),
        None => (terminate(&mut child, &identity, stop_timeout).await, true),
    };

    let event = match status {
        Ok(status) => {
            tracing::debug!(identity = %identity, generation, %status, requested, "Worker process exited");
            ExitEvent::from_status(identity, generation, status, requested)
        }
        Err(e) => {
            tracing::warn!(identity = %identity, generation, error = %e, "Failed to wait for worker process");
            ExitEvent {
                identity,
                generation,
                code: None,
                signal: None,
                requested,
            }
        }
    };

    // The supervisor may already be gone during shutdown
    let _ = exits.send(event);
}

/// Send a graceful terminate, escalating to a kill after `stop_timeout`.
async fn terminate(
    child: &mut Child,
    identity: &WorkerIdentity,
    stop_timeout: Option<Duration>,
) -> std::io::Result<ExitStatus> {
    if let Err(e) = send_terminate(child) {
        tracing::debug!(identity = %identity, error = %e, "Failed to signal worker, it may have exited");
    }

    let Some(grace) = stop_timeout else {
        return child.wait().await;
    };

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                identity = %identity,
                grace_secs = grace.as_secs(),
                "Worker ignored terminate signal, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    signal::kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
