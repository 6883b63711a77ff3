//! # rats-app - Control Plane Orchestration
//!
//! Wires the searchd supervisor, the message bridge and the shutdown
//! coordinator together and runs them.
//!
//! Depends on [`rats_core`] and [`rats_searchd`].
//!
//! ## Public API
//!
//! ### Bridge
//! - [`Bridge`] - Named operations, correlated replies, events to the UI
//! - [`CallEnvelope`], [`Outgoing`] - Typed wire messages
//! - [`BridgeClient`] - Caller side: tokens, pending calls, timeouts
//!
//! ### Shutdown
//! - [`ShutdownCoordinator`] - Runs the stop sequence exactly once
//! - [`DaemonControl`], [`Worker`] - What the coordinator stops
//!
//! ### Orchestration
//! - [`Engine`] - From config generation to process exit
//! - [`ControlContext`] - Explicitly shared components
//!
//! ### Configuration
//! - [`config::Settings`], [`config::AppPaths`], [`config::Environment`]

pub mod bridge;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod shutdown;
pub mod signals;
pub mod transport;

pub use bridge::{Bridge, CallEnvelope, CorrelationToken, Invocation, Outgoing, Reply};
pub use client::{next_token, BridgeClient, ReplyTracker};
pub use context::ControlContext;
pub use engine::{register_builtin_operations, Engine, WorkerFactory};
pub use shutdown::{DaemonControl, ShutdownCoordinator, ShutdownOutcome, Worker};
pub use signals::spawn_signal_handler;
pub use transport::spawn_stdio;
