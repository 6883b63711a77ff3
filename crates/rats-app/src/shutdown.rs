//! Shutdown coordination
//!
//! Whatever asks for shutdown first wins; the stop sequence runs once:
//!
//! 1. stop the attached worker and wait for it
//! 2. ask searchd to stop (or kill it if it never became ready)
//!
//! The process exits once the supervisor reports the daemon gone.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;

use rats_core::prelude::*;
use rats_core::ShutdownTrigger;
use rats_searchd::Supervisor;

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;

/// What the coordinator needs from the daemon supervisor
pub trait DaemonControl: Send + Sync {
    /// Whether a daemon was ever launched
    fn is_started(&self) -> bool;

    /// Graceful stop. `false` if the daemon was not in a state to stop.
    fn stop(&self) -> bool;

    /// Forced stop for a daemon that never became ready. `false` if no
    /// daemon is live.
    fn abort(&self) -> bool;
}

impl DaemonControl for Supervisor {
    fn is_started(&self) -> bool {
        Supervisor::is_started(self)
    }

    fn stop(&self) -> bool {
        Supervisor::stop(self)
    }

    fn abort(&self) -> bool {
        Supervisor::abort(self)
    }
}

/// The crawler/worker component, as far as shutdown is concerned
pub trait Worker: Send + Sync {
    /// Resolves once the worker has released everything that talks to searchd
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// Result of [`ShutdownCoordinator::trigger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// A shutdown was already in progress; nothing was done
    Suppressed,
    /// The daemon was asked to stop; exit follows when it is gone
    DaemonStopRequested,
    /// Nothing left to stop; exit now
    ExitRequested,
}

/// Runs the stop sequence at most once
pub struct ShutdownCoordinator {
    state: AtomicU8,
    daemon: Arc<dyn DaemonControl>,
    worker: Mutex<Option<Arc<dyn Worker>>>,
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("in_progress", &self.is_in_progress())
            .field("worker_attached", &self.has_worker())
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new(daemon: Arc<dyn DaemonControl>) -> Self {
        Self {
            state: AtomicU8::new(NOT_STARTED),
            daemon,
            worker: Mutex::new(None),
        }
    }

    /// Attach the worker once it exists (after searchd became ready)
    pub fn attach_worker(&self, worker: Arc<dyn Worker>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
    }

    pub fn has_worker(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.load(Ordering::Acquire) == IN_PROGRESS
    }

    /// Start shutting down. Only the first call does anything.
    pub async fn trigger(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        if self
            .state
            .compare_exchange(NOT_STARTED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Shutdown already in progress, ignoring '{}'", trigger);
            return ShutdownOutcome::Suppressed;
        }

        info!("Shutting down: {}", trigger);

        if !self.daemon.is_started() {
            info!("searchd was never started, exiting");
            return ShutdownOutcome::ExitRequested;
        }

        // Clone out so the lock is not held across the await
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(worker) = worker {
            info!("Stopping worker before searchd");
            worker.stop().await;
            info!("Worker stopped");
        }

        if self.daemon.stop() {
            return ShutdownOutcome::DaemonStopRequested;
        }

        if self.daemon.abort() {
            warn!("searchd was not ready, killed it instead of a graceful stop");
            return ShutdownOutcome::DaemonStopRequested;
        }

        info!("searchd is not running, exiting");
        ShutdownOutcome::ExitRequested
    }
}
