//! # rats-core - Core Domain Types
//!
//! Foundation crate for the rats search control plane. Provides error
//! handling, the events exchanged between the searchd supervisor and the
//! application layer, and logging setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`DaemonEvent`] - stdout/stderr/exit events from the searchd process
//! - [`ShutdownTrigger`] - reasons the application starts shutting down
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use rats_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;

pub use error::{Error, Result, ResultExt};
pub use events::{DaemonEvent, ShutdownTrigger};
