//! searchd lifecycle supervision
//!
//! [`Lifecycle`] is the pure state machine:
//!
//! ```text
//! NotStarted ─► Starting ─► Ready ─► Stopping ─► Stopped
//!                  │          │
//!                  └──────────┴─► Crashed   (unexpected exit)
//! ```
//!
//! [`Supervisor`] drives it from the events of a [`SearchdProcess`]: it
//! resolves a [`Readiness`] future when the readiness marker shows up on
//! stdout and reports exactly one [`SupervisorExit`] when the process is gone.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};

use crate::process::{spawn_stopwait, SearchdProcess};
use rats_core::events::DaemonEvent;
use rats_core::prelude::*;

/// searchd prints this once its listeners accept connections
pub const READY_MARKER: &str = "accepting connections";

/// Lifecycle state of the supervised daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Crashed,
}

impl SupervisorState {
    pub fn name(self) -> &'static str {
        match self {
            SupervisorState::NotStarted => "not started",
            SupervisorState::Starting => "starting",
            SupervisorState::Ready => "ready",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Crashed => "crashed",
        }
    }

    /// A process is (or may still be) running in this state
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SupervisorState::Starting | SupervisorState::Ready | SupervisorState::Stopping
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the daemon went away. Delivered once per launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Exit after a stop request
    Stopped {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Exit nobody asked for
    Crashed {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl SupervisorExit {
    pub fn is_crash(&self) -> bool {
        matches!(self, SupervisorExit::Crashed { .. })
    }

    /// `Err(Error::DaemonCrash)` for a crash, `Ok(())` otherwise
    pub fn into_result(self) -> Result<()> {
        match self {
            SupervisorExit::Stopped { .. } => Ok(()),
            SupervisorExit::Crashed { code, signal } => Err(Error::DaemonCrash { code, signal }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Pure lifecycle state machine, fed with process events
#[derive(Debug)]
pub struct Lifecycle {
    state: SupervisorState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// A new process was launched
    pub fn starting(&mut self) {
        self.state = SupervisorState::Starting;
    }

    /// Feed one line of stdout. Returns `true` only for the line that made
    /// the daemon Ready; repeated markers are ignored.
    pub fn on_stdout(&mut self, line: &str) -> bool {
        if self.state == SupervisorState::Starting && line.contains(READY_MARKER) {
            self.state = SupervisorState::Ready;
            return true;
        }
        false
    }

    /// Ready → Stopping. Anything else is refused.
    pub fn begin_stop(&mut self) -> bool {
        if self.state == SupervisorState::Ready {
            self.state = SupervisorState::Stopping;
            return true;
        }
        false
    }

    /// Starting|Ready → Stopping for a forced kill, so the exit is not
    /// reported as a crash.
    pub fn begin_abort(&mut self) -> bool {
        if matches!(
            self.state,
            SupervisorState::Starting | SupervisorState::Ready
        ) {
            self.state = SupervisorState::Stopping;
            return true;
        }
        false
    }

    /// The process exited. Returns `None` if there was no live process.
    pub fn on_exit(&mut self, code: Option<i32>, signal: Option<i32>) -> Option<SupervisorExit> {
        match self.state {
            SupervisorState::Starting | SupervisorState::Ready => {
                self.state = SupervisorState::Crashed;
                Some(SupervisorExit::Crashed { code, signal })
            }
            SupervisorState::Stopping => {
                self.state = SupervisorState::Stopped;
                Some(SupervisorExit::Stopped { code, signal })
            }
            SupervisorState::NotStarted | SupervisorState::Stopped | SupervisorState::Crashed => {
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Async driver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves when searchd starts accepting connections.
///
/// Never resolves while searchd keeps running without printing the marker.
/// Resolves with an error if the process exits first. Callers that need a
/// bounded startup wrap it in `tokio::time::timeout`.
#[derive(Debug)]
pub struct Readiness {
    rx: oneshot::Receiver<()>,
}

impl Future for Readiness {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.map_err(|_| Error::process("searchd exited before accepting connections"))
        })
    }
}

/// Handles returned by [`Supervisor::start`]
#[derive(Debug)]
pub struct StartHandle {
    pub ready: Readiness,
    /// Fires exactly once, when the launched process is gone
    pub exited: oneshot::Receiver<SupervisorExit>,
}

/// Owns the searchd process and its lifecycle
pub struct Supervisor {
    binary: PathBuf,
    lifecycle: Arc<Mutex<Lifecycle>>,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    config_path: Mutex<Option<PathBuf>>,
    process: Mutex<Option<SearchdProcess>>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("binary", &self.binary)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Critical sections never panic midway; a poisoned guard is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Supervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::NotStarted);
        Self {
            binary: binary.into(),
            lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
            state_tx: Arc::new(state_tx),
            config_path: Mutex::new(None),
            process: Mutex::new(None),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn state(&self) -> SupervisorState {
        lock(&self.lifecycle).state()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// PID of the current process, if one was launched
    pub fn pid(&self) -> Option<u32> {
        lock(&self.process).as_ref().and_then(SearchdProcess::id)
    }

    /// Whether `start` ever launched a process
    pub fn is_started(&self) -> bool {
        self.state() != SupervisorState::NotStarted
    }

    /// Launch searchd with an already written config file
    pub fn start(&self, config_path: &Path) -> Result<StartHandle> {
        let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);
        {
            // Check and claim under one lock: concurrent starts launch one daemon
            let mut lc = lock(&self.lifecycle);
            if lc.state().is_live() {
                return Err(Error::process(format!("searchd is already {}", lc.state())));
            }
            let process = SearchdProcess::spawn(&self.binary, config_path, event_tx)?;
            lc.starting();
            *lock(&self.config_path) = Some(config_path.to_path_buf());
            *lock(&self.process) = Some(process);
        }
        self.state_tx.send_replace(SupervisorState::Starting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(Self::pump_events(
            event_rx,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.state_tx),
            ready_tx,
            exit_tx,
        ));

        Ok(StartHandle {
            ready: Readiness { rx: ready_rx },
            exited: exit_rx,
        })
    }

    /// Feed process events into the lifecycle until the process exits
    async fn pump_events(
        mut event_rx: mpsc::Receiver<DaemonEvent>,
        lifecycle: Arc<Mutex<Lifecycle>>,
        state_tx: Arc<watch::Sender<SupervisorState>>,
        ready_tx: oneshot::Sender<()>,
        exit_tx: oneshot::Sender<SupervisorExit>,
    ) {
        let mut ready_tx = Some(ready_tx);

        while let Some(event) = event_rx.recv().await {
            match event {
                DaemonEvent::Stdout(line) => {
                    let became_ready = lock(&lifecycle).on_stdout(&line);
                    if became_ready {
                        info!("caught searchd start");
                        state_tx.send_replace(SupervisorState::Ready);
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }
                DaemonEvent::Stderr(_) => {}
                DaemonEvent::Exited { code, signal } => {
                    let (exit, state) = {
                        let mut lc = lock(&lifecycle);
                        (lc.on_exit(code, signal), lc.state())
                    };
                    info!(
                        "searchd closed with code {:?} and signal {:?}",
                        code, signal
                    );
                    if let Some(exit) = exit {
                        state_tx.send_replace(state);
                        if exit.is_crash() {
                            error!("searchd exited unexpectedly, the application cannot continue");
                        }
                        let _ = exit_tx.send(exit);
                    }
                    return;
                }
            }
        }

        debug!("searchd event channel closed without an exit event");
    }

    /// Ask searchd to stop gracefully.
    ///
    /// Only meaningful while Ready. Launches `searchd --stopwait` in the
    /// background and returns immediately; completion is reported through
    /// [`StartHandle::exited`]. Returns `false` (and does nothing) otherwise.
    pub fn stop(&self) -> bool {
        {
            let mut lc = lock(&self.lifecycle);
            if !lc.begin_stop() {
                info!("Ignoring searchd stop request while {}", lc.state());
                return false;
            }
        }
        self.state_tx.send_replace(SupervisorState::Stopping);

        let config_path = lock(&self.config_path).clone();
        let spawned = match config_path {
            Some(path) => spawn_stopwait(&self.binary, &path),
            None => Err(Error::process("no config path recorded for searchd")),
        };

        if let Err(e) = spawned {
            // Without the helper searchd would never exit; kill it instead.
            error!("Failed to request graceful searchd stop: {}", e);
            if let Some(process) = lock(&self.process).as_mut() {
                process.force_kill();
            }
        }

        true
    }

    /// Kill searchd without the graceful helper.
    ///
    /// For shutdowns that happen before searchd became Ready, when
    /// `--stopwait` has nothing to talk to yet. Returns `false` if no process
    /// is live.
    pub fn abort(&self) -> bool {
        {
            let mut lc = lock(&self.lifecycle);
            if !lc.begin_abort() {
                return false;
            }
        }
        self.state_tx.send_replace(SupervisorState::Stopping);

        match lock(&self.process).as_mut() {
            Some(process) => {
                process.force_kill();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_transitions_once() {
        let mut lc = Lifecycle::new();
        lc.starting();

        let lines = [
            "Sphinx 2.2.11-id64-release",
            "listening on all interfaces, port=9312",
            "accepting connections",
            "accepting connections",
            "rotating indices: accepting connections again",
        ];
        let transitions = lines.iter().filter(|l| lc.on_stdout(l)).count();

        assert_eq!(transitions, 1);
        assert_eq!(lc.state(), SupervisorState::Ready);
    }

    #[test]
    fn test_marker_embedded_in_line() {
        let mut lc = Lifecycle::new();
        lc.starting();
        assert!(lc.on_stdout("[Mon Jan 1 00:00:00.000 2024] [123] accepting connections"));
    }

    #[test]
    fn test_marker_ignored_before_start() {
        let mut lc = Lifecycle::new();
        assert!(!lc.on_stdout("accepting connections"));
        assert_eq!(lc.state(), SupervisorState::NotStarted);
    }

    #[test]
    fn test_no_marker_stays_starting() {
        let mut lc = Lifecycle::new();
        lc.starting();
        for line in ["loading", "precaching", "accepting"] {
            assert!(!lc.on_stdout(line));
        }
        assert_eq!(lc.state(), SupervisorState::Starting);
    }

    #[test]
    fn test_exit_while_ready_crashes_once() {
        let mut lc = Lifecycle::new();
        lc.starting();
        lc.on_stdout(READY_MARKER);

        let first = lc.on_exit(Some(1), None);
        let second = lc.on_exit(Some(1), None);

        assert_eq!(
            first,
            Some(SupervisorExit::Crashed {
                code: Some(1),
                signal: None
            })
        );
        assert_eq!(second, None);
        assert_eq!(lc.state(), SupervisorState::Crashed);
    }

    #[test]
    fn test_exit_while_starting_crashes() {
        let mut lc = Lifecycle::new();
        lc.starting();
        let exit = lc.on_exit(None, Some(11)).unwrap();
        assert!(exit.is_crash());
        assert!(matches!(
            exit.into_result(),
            Err(Error::DaemonCrash {
                signal: Some(11),
                ..
            })
        ));
    }

    #[test]
    fn test_stop_only_from_ready() {
        let mut lc = Lifecycle::new();
        assert!(!lc.begin_stop());

        lc.starting();
        assert!(!lc.begin_stop());
        assert_eq!(lc.state(), SupervisorState::Starting);

        lc.on_stdout(READY_MARKER);
        assert!(lc.begin_stop());
        assert!(!lc.begin_stop());
        assert_eq!(lc.state(), SupervisorState::Stopping);

        let exit = lc.on_exit(Some(0), None).unwrap();
        assert!(!exit.is_crash());
        assert!(exit.into_result().is_ok());
        assert_eq!(lc.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_abort_from_starting_is_not_a_crash() {
        let mut lc = Lifecycle::new();
        lc.starting();
        assert!(lc.begin_abort());
        let exit = lc.on_exit(None, Some(9)).unwrap();
        assert!(matches!(exit, SupervisorExit::Stopped { .. }));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SupervisorState::Ready.to_string(), "ready");
        assert!(SupervisorState::Stopping.is_live());
        assert!(!SupervisorState::Crashed.is_live());
        assert!(!SupervisorState::NotStarted.is_live());
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let supervisor = Supervisor::new("/nonexistent/searchd");
        assert!(!supervisor.stop());
        assert!(!supervisor.abort());
        assert!(!supervisor.is_started());
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
    }

    #[tokio::test]
    async fn test_readiness_errors_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let ready = Readiness { rx };
        assert!(ready.await.is_err());
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use crate::test_utils::{fake_searchd, FakeSearchd};
        use serial_test::serial;
        use std::time::Duration;
        use tempfile::tempdir;

        const WAIT: Duration = Duration::from_secs(5);

        fn setup(behavior: FakeSearchd) -> (tempfile::TempDir, Supervisor, PathBuf) {
            let temp = tempdir().unwrap();
            let binary = fake_searchd(temp.path(), behavior);
            let config = temp.path().join("sphinx.conf");
            std::fs::write(&config, "").unwrap();
            (temp, Supervisor::new(binary), config)
        }

        #[tokio::test]
        #[serial]
        async fn test_start_ready_then_graceful_stop() {
            let (_temp, supervisor, config) = setup(FakeSearchd::Healthy);

            let handle = supervisor.start(&config).unwrap();
            assert!(supervisor.pid().is_some());

            tokio::time::timeout(WAIT, handle.ready)
                .await
                .expect("ready in time")
                .expect("ready before exit");
            assert_eq!(supervisor.state(), SupervisorState::Ready);

            assert!(supervisor.stop());
            assert!(!supervisor.stop(), "second stop must be a no-op");

            let exit = tokio::time::timeout(WAIT, handle.exited)
                .await
                .expect("exit in time")
                .expect("exit reported");
            assert!(matches!(exit, SupervisorExit::Stopped { .. }));
            assert_eq!(supervisor.state(), SupervisorState::Stopped);
        }

        #[tokio::test]
        #[serial]
        async fn test_ready_after_non_utf8_output() {
            let (_temp, supervisor, config) = setup(FakeSearchd::LegacyEncodedPath);

            let handle = supervisor.start(&config).unwrap();
            tokio::time::timeout(WAIT, handle.ready)
                .await
                .expect("ready in time")
                .expect("ready before exit");
            assert_eq!(supervisor.state(), SupervisorState::Ready);

            // Still alive: output after the odd line did not hit a closed pipe
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(supervisor.state(), SupervisorState::Ready);

            assert!(supervisor.stop());
            let exit = tokio::time::timeout(WAIT, handle.exited)
                .await
                .unwrap()
                .unwrap();
            assert!(!exit.is_crash());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        #[serial]
        async fn test_concurrent_starts_launch_one_daemon() {
            let (_temp, supervisor, config) = setup(FakeSearchd::Healthy);
            let runtime = tokio::runtime::Handle::current();

            let handles: Vec<_> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(|| {
                            let _guard = runtime.enter();
                            supervisor.start(&config)
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            let started: Vec<_> = handles.into_iter().filter_map(|h| h.ok()).collect();
            assert_eq!(started.len(), 1);

            let handle = started.into_iter().next().unwrap();
            tokio::time::timeout(WAIT, handle.ready)
                .await
                .unwrap()
                .unwrap();
            assert!(supervisor.stop());
            tokio::time::timeout(WAIT, handle.exited)
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        #[serial]
        async fn test_crash_after_ready() {
            let (_temp, supervisor, config) = setup(FakeSearchd::CrashAfterReady);
            let mut state_rx = supervisor.subscribe();

            let handle = supervisor.start(&config).unwrap();
            tokio::time::timeout(WAIT, handle.ready)
                .await
                .unwrap()
                .unwrap();

            let exit = tokio::time::timeout(WAIT, handle.exited)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                exit,
                SupervisorExit::Crashed {
                    code: Some(1),
                    signal: None
                }
            );
            assert_eq!(*state_rx.borrow_and_update(), SupervisorState::Crashed);
            assert!(!supervisor.stop());
        }

        #[tokio::test]
        #[serial]
        async fn test_exit_before_ready_fails_readiness() {
            let (_temp, supervisor, config) = setup(FakeSearchd::NeverReady);

            let handle = supervisor.start(&config).unwrap();
            let ready = tokio::time::timeout(WAIT, handle.ready).await.unwrap();
            assert!(ready.is_err());

            let exit = handle.exited.await.unwrap();
            assert_eq!(
                exit,
                SupervisorExit::Crashed {
                    code: Some(2),
                    signal: None
                }
            );
        }

        #[tokio::test]
        #[serial]
        async fn test_abort_while_starting() {
            let (_temp, supervisor, config) = setup(FakeSearchd::Silent);

            let mut handle = supervisor.start(&config).unwrap();

            // Stays Starting without the marker
            let pending = tokio::time::timeout(Duration::from_millis(200), &mut handle.ready).await;
            assert!(pending.is_err());
            assert_eq!(supervisor.state(), SupervisorState::Starting);
            assert!(!supervisor.stop());

            assert!(supervisor.abort());
            let exit = tokio::time::timeout(WAIT, handle.exited)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(exit, SupervisorExit::Stopped { .. }));
        }

        #[tokio::test]
        #[serial]
        async fn test_double_start_rejected() {
            let (_temp, supervisor, config) = setup(FakeSearchd::Silent);

            let _handle = supervisor.start(&config).unwrap();
            assert!(supervisor.start(&config).is_err());
            supervisor.abort();
        }
    }
}
