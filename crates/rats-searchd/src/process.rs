//! searchd process management

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use rats_core::events::DaemonEvent;
use rats_core::prelude::*;

/// Keep searchd in the foreground so we own its lifecycle. Windows builds of
/// searchd never detach when started from a console, and reject the flag.
const NO_DETACH_FLAG: &str = "--nodetach";

/// Ask a running searchd (identified by its config) to stop and wait for it
const STOPWAIT_FLAG: &str = "--stopwait";

/// Arguments to launch searchd on the host platform
pub fn start_args(config_path: &Path) -> Vec<OsString> {
    start_args_for(config_path, cfg!(windows))
}

/// Arguments to launch searchd, with the platform made explicit
pub fn start_args_for(config_path: &Path, windows: bool) -> Vec<OsString> {
    let mut args = vec![OsString::from("--config"), config_path.as_os_str().to_owned()];
    if !windows {
        args.push(OsString::from(NO_DETACH_FLAG));
    }
    args
}

/// Arguments for the graceful stop helper
pub fn stopwait_args(config_path: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--config"),
        config_path.as_os_str().to_owned(),
        OsString::from(STOPWAIT_FLAG),
    ]
}

/// Manages a searchd child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background task
/// that calls `child.wait()`, so the real exit code and signal are reported in
/// `DaemonEvent::Exited`. `SearchdProcess` keeps a kill channel for the
/// force-kill path and an atomic flag for synchronous `has_exited()` checks.
pub struct SearchdProcess {
    /// Process ID for logging
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
}

impl SearchdProcess {
    /// Spawn searchd with the given config file
    ///
    /// Events are sent to `event_tx` for processing by the supervisor.
    pub fn spawn(
        binary: &Path,
        config_path: &Path,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Result<Self> {
        Self::spawn_internal(binary, &start_args(config_path), event_tx)
    }

    /// Internal spawn implementation. All public constructors delegate here.
    fn spawn_internal(
        binary: &Path,
        args: &[OsString],
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Result<Self> {
        info!(
            "Spawning searchd: {} {}",
            binary.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Critical: cleanup on drop
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::SearchdNotFound {
                        searched: binary.display().to_string(),
                    }
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })?;

        let pid = child.id();
        info!("searchd started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("searchd stdout was not captured"))?;
        tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("searchd stderr was not captured"))?;
        tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));

        let exited = Arc::new(AtomicBool::new(false));

        // Kill channel: SearchdProcess holds the sender, wait task holds the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `DaemonEvent::Exited`.
    ///
    /// Two ways the task can end:
    /// 1. searchd exits on its own (crash, or after a `--stopwait` request).
    /// 2. `kill_rx` fires: kill the child first, then wait for it.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<DaemonEvent>,
        exited: Arc<AtomicBool>,
    ) {
        let (code, signal) = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("searchd exited with status: {:?}", status);
                        exit_parts(status)
                    }
                    Err(e) => {
                        error!("Error waiting for searchd: {}", e);
                        (None, None)
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing searchd");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill searchd: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("searchd killed, exit status: {:?}", status);
                        exit_parts(status)
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        (None, None)
                    }
                }
            }
        };

        // Mark as exited before sending the event, so `has_exited()` is
        // already true when the supervisor observes it.
        exited.store(true, Ordering::Release);

        debug!(
            "Sending DaemonEvent::Exited {{ code: {:?}, signal: {:?} }}",
            code, signal
        );
        let _ = event_tx.send(DaemonEvent::Exited { code, signal }).await;
    }

    /// Read lines from stdout and send as `DaemonEvent::Stdout`.
    ///
    /// Does NOT emit `DaemonEvent::Exited`; that is the wait task's job.
    async fn stdout_reader(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<DaemonEvent>) {
        drain_lines(stdout, "stdout", tx, |line| {
            info!("searchd: {}", line);
            DaemonEvent::Stdout(line)
        })
        .await;
    }

    /// Read lines from stderr and send as `DaemonEvent::Stderr`
    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<DaemonEvent>) {
        drain_lines(stderr, "stderr", tx, |line| {
            warn!("searchd stderr: {}", line);
            DaemonEvent::Stderr(line)
        })
        .await;
    }

    /// Force kill the process by signalling the wait task.
    ///
    /// Only used when searchd never reached a state where `--stopwait` can
    /// work. A killed searchd may leave its RT indexes needing binlog replay.
    pub fn force_kill(&mut self) {
        warn!("Force killing searchd via kill channel");
        if let Some(tx) = self.kill_tx.take() {
            // The wait task may have already exited naturally.
            let _ = tx.send(());
        }
    }

    /// Non-blocking check backed by the flag the wait task sets
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for SearchdProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("SearchdProcess dropped while searchd may still be running");
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        debug!("SearchdProcess dropped");
    }
}

/// Launch `searchd --config <path> --stopwait` without waiting for it.
///
/// The helper exits once the daemon has flushed its indexes and stopped. The
/// daemon's own exit is observed through the supervised process, so the
/// helper's status is only logged.
pub fn spawn_stopwait(binary: &Path, config_path: &Path) -> Result<()> {
    let args = stopwait_args(config_path);
    info!("searchd closing...");

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ProcessSpawn {
            reason: format!("stop helper: {}", e),
        })?;

    let stderr = child.stderr.take();
    tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("searchd --stopwait: {}", line);
            }
        }
        match child.wait().await {
            Ok(status) if status.success() => debug!("stop helper finished"),
            Ok(status) => warn!("stop helper exited with {:?}", status),
            Err(e) => error!("Error waiting for stop helper: {}", e),
        }
    });

    Ok(())
}

/// Read `pipe` to EOF, one line at a time.
///
/// searchd prints paths in the config's encoding (Windows-1251 on Windows),
/// so lines are split on raw bytes and decoded lossily. The pipe is drained
/// even after the receiver is gone so searchd never writes into a closed pipe.
async fn drain_lines<R, F>(pipe: R, name: &str, tx: mpsc::Sender<DaemonEvent>, to_event: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> DaemonEvent,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut forwarding = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if forwarding && tx.send(to_event(line)).await.is_err() {
                    debug!("{} channel closed, discarding further output", name);
                    forwarding = false;
                }
            }
            Err(e) => {
                warn!("Error reading searchd {}: {}", name, e);
                break;
            }
        }
    }

    debug!("{} reader finished, searchd likely exiting", name);
}

/// One output line without its terminator, invalid UTF-8 replaced
fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw
        .strip_suffix(b"\n")
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .unwrap_or(raw);
    String::from_utf8_lossy(trimmed).into_owned()
}

#[cfg(unix)]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}
