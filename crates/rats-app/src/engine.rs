//! Engine - runs the control plane from config generation to exit
//!
//! 1. write `sphinx.conf`
//! 2. launch searchd and wait for it to accept connections
//! 3. attach the worker and start serving bridge calls
//! 4. on a shutdown trigger, stop the worker, then searchd
//! 5. return once searchd is gone

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use rats_core::prelude::*;
use rats_core::ShutdownTrigger;
use rats_searchd::{Readiness, StartHandle, Supervisor, SupervisorExit};

use crate::bridge::{Bridge, CallEnvelope};
use crate::context::ControlContext;
use crate::shutdown::{ShutdownOutcome, Worker};

/// Builds the worker once searchd is ready. It registers its operations on
/// the bridge it is given.
pub type WorkerFactory = Box<dyn FnOnce(Arc<Bridge>) -> Arc<dyn Worker> + Send>;

/// Register `ping`, `version` and `daemonState`.
///
/// Registered before the worker so the worker may replace them.
pub fn register_builtin_operations(bridge: &Bridge, supervisor: &Arc<Supervisor>) {
    bridge.register_request("ping", |_| async { Ok(Value::from("pong")) });
    bridge.register_request("version", |_| async {
        Ok(Value::from(env!("CARGO_PKG_VERSION")))
    });

    let supervisor = Arc::clone(supervisor);
    bridge.register_request("daemonState", move |_| {
        let state = supervisor.state();
        async move { Ok(Value::from(state.name())) }
    });
}

/// Orchestration engine for the rats control plane
pub struct Engine {
    ctx: ControlContext,
    trigger_tx: mpsc::Sender<ShutdownTrigger>,
    trigger_rx: mpsc::Receiver<ShutdownTrigger>,
    call_tx: mpsc::Sender<CallEnvelope>,
    /// Taken when the bridge starts serving
    call_rx: Option<mpsc::Receiver<CallEnvelope>>,
    worker_factory: Option<WorkerFactory>,
}

impl Engine {
    pub fn new(ctx: ControlContext) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (call_tx, call_rx) = mpsc::channel(256);
        Self {
            ctx,
            trigger_tx,
            trigger_rx,
            call_tx,
            call_rx: Some(call_rx),
            worker_factory: None,
        }
    }

    /// Attach a worker once searchd is ready
    pub fn with_worker<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<Bridge>) -> Arc<dyn Worker> + Send + 'static,
    {
        self.worker_factory = Some(Box::new(factory));
        self
    }

    pub fn context(&self) -> &ControlContext {
        &self.ctx
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.ctx.bridge
    }

    /// Clone this to give to trigger sources (UI reader, signal handler)
    pub fn trigger_sender(&self) -> mpsc::Sender<ShutdownTrigger> {
        self.trigger_tx.clone()
    }

    /// Calls sent here are buffered until searchd is ready
    pub fn call_sender(&self) -> mpsc::Sender<CallEnvelope> {
        self.call_tx.clone()
    }

    /// Run until searchd is gone.
    ///
    /// `Ok(())` after an orderly shutdown; an error if the config cannot be
    /// written, searchd cannot be launched, never becomes ready in time, or
    /// crashes.
    pub async fn run(mut self) -> Result<()> {
        let config_path =
            rats_searchd::generate(&self.ctx.daemon_config()).context("Generating sphinx.conf")?;

        register_builtin_operations(&self.ctx.bridge, &self.ctx.supervisor);

        let StartHandle { ready, mut exited } = self
            .ctx
            .supervisor
            .start(&config_path)
            .with_context(|| format!("Launching {}", self.ctx.supervisor.binary().display()))?;

        match self.wait_until_ready(ready, &mut exited).await? {
            None => self.start_serving(),
            Some(ShutdownOutcome::ExitRequested) => return self.exit_now(&mut exited),
            // searchd is being stopped; wait for it below
            Some(_) => {}
        }

        self.serve_until_exit(exited).await
    }

    /// `Ok(None)` once ready, `Ok(Some(outcome))` if shutdown began first
    async fn wait_until_ready(
        &mut self,
        ready: Readiness,
        exited: &mut oneshot::Receiver<SupervisorExit>,
    ) -> Result<Option<ShutdownOutcome>> {
        let limit = self.ctx.startup_timeout();
        let startup = async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, ready)
                    .await
                    .map_err(|_| Error::StartupTimeout {
                        secs: limit.as_secs(),
                    })?,
                None => ready.await,
            }
        };
        tokio::pin!(startup);

        loop {
            tokio::select! {
                result = &mut startup => {
                    return match result {
                        Ok(()) => {
                            info!("searchd is accepting connections");
                            Ok(None)
                        }
                        Err(e @ Error::StartupTimeout { .. }) => {
                            error!("{}", e);
                            self.ctx.supervisor.abort();
                            let _ = exited.await;
                            Err(e)
                        }
                        Err(_) => {
                            let exit = exited.await.map_err(|_| Error::ChannelClosed)?;
                            self.ctx.shutdown.trigger(ShutdownTrigger::DaemonCrashed).await;
                            exit.into_result()?;
                            Err(Error::process("searchd exited before accepting connections"))
                        }
                    };
                }
                Some(trigger) = self.trigger_rx.recv() => {
                    info!("Shutdown requested while searchd is starting");
                    let outcome = self.ctx.shutdown.trigger(trigger).await;
                    if outcome != ShutdownOutcome::Suppressed {
                        return Ok(Some(outcome));
                    }
                }
            }
        }
    }

    /// Attach the worker and start dispatching bridge calls
    fn start_serving(&mut self) {
        if let Some(factory) = self.worker_factory.take() {
            let worker = factory(Arc::clone(&self.ctx.bridge));
            self.ctx.shutdown.attach_worker(worker);
            info!("Worker attached");
        }

        if let Some(call_rx) = self.call_rx.take() {
            let bridge = Arc::clone(&self.ctx.bridge);
            tokio::spawn(async move { bridge.serve(call_rx).await });
            info!(
                "Bridge serving {} operation(s)",
                self.ctx.bridge.operations().len()
            );
        }
    }

    async fn serve_until_exit(
        &mut self,
        mut exited: oneshot::Receiver<SupervisorExit>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                exit = &mut exited => {
                    let exit = exit.map_err(|_| Error::ChannelClosed)?;
                    if exit.is_crash() {
                        self.ctx.shutdown.trigger(ShutdownTrigger::DaemonCrashed).await;
                    }
                    self.ctx.bridge.teardown();
                    return exit.into_result();
                }
                Some(trigger) = self.trigger_rx.recv() => {
                    if self.ctx.shutdown.trigger(trigger).await == ShutdownOutcome::ExitRequested {
                        return self.exit_now(&mut exited);
                    }
                }
            }
        }
    }

    /// Nothing left to stop. Report a crash that raced the shutdown.
    fn exit_now(&self, exited: &mut oneshot::Receiver<SupervisorExit>) -> Result<()> {
        self.ctx.bridge.teardown();
        match exited.try_recv() {
            Ok(exit) => exit.into_result(),
            Err(_) => Ok(()),
        }
    }
}
