//! `peerd` process lifecycle: spawn, readiness detection, shutdown.
//!
//! [`start`] launches the daemon with its fixed first-run argument vector,
//! pumps stdout/stderr into a [`CaptureState`], and resolves once the
//! readiness marker appears, the child dies, or the timeout expires --
//! whichever comes first. The returned [`DaemonHandle`] owns the child
//! exclusively; [`DaemonHandle::stop`] consumes it and terminates the
//! process with SIGTERM, escalating to SIGKILL after a grace period.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::capture::{CaptureState, ProbeStream, ReadinessProbe};
use crate::error::BootstrapError;

/// Default wait for the readiness marker.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait between SIGTERM and SIGKILL.
const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(5);

/// Pause after a clean exit so the released pipes fully settle.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Readiness marker printed by `peerd` once it accepts connections. With
/// `--json` active the notice lands on stderr.
const DEFAULT_READY_MARKER: &str = "Listening on lo";

/// Launch parameters for the daemon's first run.
///
/// The timeouts default to production values; tests inject short ones.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path to the `peerd` binary.
    pub binary: PathBuf,
    /// Base storage directory handed to `-b`.
    pub base_dir: PathBuf,
    /// Loopback listen port.
    pub port: u16,
    /// Admin public key the daemon is provisioned with.
    pub admin_public_key: String,
    /// Which stream to watch for which marker.
    pub probe: ReadinessProbe,
    pub ready_timeout: Duration,
    pub term_grace: Duration,
    pub settle_delay: Duration,
}

impl DaemonConfig {
    pub fn new(
        binary: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        port: u16,
        admin_public_key: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            base_dir: base_dir.into(),
            port,
            admin_public_key: admin_public_key.into(),
            probe: ReadinessProbe::new(ProbeStream::Stderr, DEFAULT_READY_MARKER),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            term_grace: DEFAULT_TERM_GRACE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Exclusive handle to a running, readiness-confirmed daemon.
#[derive(Debug)]
pub struct DaemonHandle {
    child: Child,
    capture: Arc<Mutex<CaptureState>>,
    payload: Value,
    stdout_pump: JoinHandle<()>,
    stderr_pump: JoinHandle<()>,
    term_grace: Duration,
    settle_delay: Duration,
}

impl DaemonHandle {
    /// The JSON startup payload extracted from stdout (`{}` if none parsed).
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The runtime-assigned peer identifier, if the payload carried one.
    ///
    /// Daemon builds have shipped both `peer_id` and `peerID` spellings, so
    /// both are accepted.
    pub fn peer_id(&self) -> Option<String> {
        ["peer_id", "peerID"]
            .iter()
            .find_map(|key| self.payload.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Snapshot of everything captured from stdout so far.
    pub async fn captured_stdout(&self) -> String {
        self.capture.lock().await.stdout().to_string()
    }

    /// Snapshot of everything captured from stderr so far.
    pub async fn captured_stderr(&self) -> String {
        self.capture.lock().await.stderr().to_string()
    }

    /// Terminate the daemon. Best-effort: never fails.
    ///
    /// Sends SIGTERM and waits up to the grace period. On exit the pump
    /// tasks are released and a short settling delay runs before returning.
    /// If the process outlives the grace period it is SIGKILLed and the
    /// call returns without waiting for exit confirmation.
    pub async fn stop(mut self) {
        signal_term(&self.child);

        match tokio::time::timeout(self.term_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "daemon exited");
                self.stdout_pump.abort();
                self.stderr_pump.abort();
                tokio::time::sleep(self.settle_delay).await;
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "failed to reap daemon");
                self.stdout_pump.abort();
                self.stderr_pump.abort();
            }
            Err(_) => {
                tracing::warn!(
                    grace = ?self.term_grace,
                    "daemon ignored SIGTERM; force killing",
                );
                if let Err(error) = self.child.start_kill() {
                    tracing::warn!(%error, "force kill failed");
                }
                self.stdout_pump.abort();
                self.stderr_pump.abort();
            }
        }
    }
}

/// Spawn the daemon and wait until it is ready to accept connections.
///
/// Readiness is signalled by the pump tasks through a watch channel the
/// moment the marker lands in the watched buffer; no polling interval is
/// involved. The wait races against child exit and against
/// `config.ready_timeout`. On every error path the child is reaped via
/// `kill_on_drop`, so no orphan daemon survives a failed start.
pub async fn start(config: &DaemonConfig) -> Result<DaemonHandle, BootstrapError> {
    let mut child = Command::new(&config.binary)
        .arg("-v")
        .arg("-b")
        .arg(&config.base_dir)
        .arg("--json")
        .arg("--save-key")
        .arg("-l")
        .arg(config.port.to_string())
        .arg("--admin")
        .arg(&config.admin_public_key)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BootstrapError::Spawn {
            binary: config.binary.display().to_string(),
            source,
        })?;

    let capture = Arc::new(Mutex::new(CaptureState::new()));
    let (ready_tx, mut ready_rx) = watch::channel(false);

    let stdout_pump = tokio::spawn(pump(
        child.stdout.take(),
        StreamKind::Stdout,
        Arc::clone(&capture),
        config.probe.clone(),
        ready_tx.clone(),
    ));
    let stderr_pump = tokio::spawn(pump(
        child.stderr.take(),
        StreamKind::Stderr,
        Arc::clone(&capture),
        config.probe.clone(),
        ready_tx.clone(),
    ));

    let outcome = tokio::select! {
        readiness = ready_rx.wait_for(|ready| *ready) => match readiness {
            Ok(_) => StartRace::Ready,
            // `ready_tx` is still held by this scope, so the channel cannot
            // close while we wait.
            Err(_) => StartRace::TimedOut,
        },
        status = child.wait() => StartRace::Exited(status),
        () = tokio::time::sleep(config.ready_timeout) => StartRace::TimedOut,
    };

    match outcome {
        StartRace::Ready => {}
        StartRace::TimedOut => {
            return Err(BootstrapError::StartTimeout {
                timeout: config.ready_timeout,
            });
        }
        StartRace::Exited(status) => {
            // Let the pumps drain whatever the child flushed on the way
            // down; a marker that raced the exit still counts as ready.
            let _ = stdout_pump.await;
            let _ = stderr_pump.await;
            if !capture.lock().await.is_ready(&config.probe) {
                return Err(match status {
                    Ok(status) => BootstrapError::PrematureExit { status },
                    Err(source) => BootstrapError::Spawn {
                        binary: config.binary.display().to_string(),
                        source,
                    },
                });
            }
            tracing::warn!("daemon exited immediately after signalling readiness");
            let payload = capture.lock().await.payload();
            return Ok(DaemonHandle {
                child,
                capture,
                payload,
                // Both pumps already finished; park trivial tasks in their
                // place so `stop` has something to release.
                stdout_pump: tokio::spawn(async {}),
                stderr_pump: tokio::spawn(async {}),
                term_grace: config.term_grace,
                settle_delay: config.settle_delay,
            });
        }
    }

    let payload = capture.lock().await.payload();
    tracing::info!("daemon is ready");

    Ok(DaemonHandle {
        child,
        capture,
        payload,
        stdout_pump,
        stderr_pump,
        term_grace: config.term_grace,
        settle_delay: config.settle_delay,
    })
}

enum StartRace {
    Ready,
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Read a child stream chunk by chunk: append to the capture, re-check the
/// readiness probe, and mirror the raw bytes to the parent's own stream for
/// operator visibility.
///
/// Connection-reset and broken-pipe reads are treated as end-of-stream;
/// other read errors are logged and end the pump, never propagated.
async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    kind: StreamKind,
    capture: Arc<Mutex<CaptureState>>,
    probe: ReadinessProbe,
    ready: watch::Sender<bool>,
) {
    let Some(mut reader) = reader else { return };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                {
                    let mut state = capture.lock().await;
                    match kind {
                        StreamKind::Stdout => state.append_stdout(&text),
                        StreamKind::Stderr => state.append_stderr(&text),
                    }
                    if state.is_ready(&probe) {
                        let _ = ready.send(true);
                    }
                }
                mirror(kind, &buf[..n]).await;
            }
            Err(error)
                if matches!(
                    error.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                break;
            }
            Err(error) => {
                tracing::warn!(%error, ?kind, "daemon stream read error");
                break;
            }
        }
    }
}

/// Transparent pass-through of child output to the matching parent stream.
async fn mirror(kind: StreamKind, bytes: &[u8]) {
    match kind {
        StreamKind::Stdout => {
            let mut out = tokio::io::stdout();
            let _ = out.write_all(bytes).await;
            let _ = out.flush().await;
        }
        StreamKind::Stderr => {
            let mut err = tokio::io::stderr();
            let _ = err.write_all(bytes).await;
            let _ = err.flush().await;
        }
    }
}

/// Request graceful termination.
#[cfg(unix)]
fn signal_term(child: &Child) {
    let Some(pid) = child.id() else {
        // Already reaped; nothing to signal.
        return;
    };
    // kill(2) is memory-safe for any pid value; failures surface via errno.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(
            pid,
            error = %std::io::Error::last_os_error(),
            "SIGTERM delivery failed",
        );
    }
}

#[cfg(not(unix))]
fn signal_term(child: &Child) {
    // No SIGTERM equivalent; stop() escalates to a hard kill after the
    // grace period regardless.
    let _ = child;
}
