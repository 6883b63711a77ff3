//! # rats-searchd - Search Daemon Management
//!
//! Generates the Sphinx `searchd` configuration and supervises the daemon
//! process through its lifecycle.
//!
//! Depends on [`rats_core`] for events and error handling.
//!
//! ## Public API
//!
//! ### Configuration
//! - [`DaemonConfig`] - Where searchd keeps its control files and indexes
//! - [`generate()`] - Write `sphinx.conf` in the platform encoding
//! - [`ConfigEncoding`] - UTF-8 or Windows-1251 config text
//!
//! ### Binary Lookup
//! - [`resolve_searchd()`] - Find the searchd executable
//!
//! ### Process Management
//! - [`SearchdProcess`] - Spawn and kill the searchd child process
//! - [`spawn_stopwait()`] - Launch the graceful stop helper
//!
//! ### Supervision
//! - [`Supervisor`] - Start, observe readiness, stop or abort searchd
//! - [`SupervisorState`], [`SupervisorExit`] - Lifecycle state and outcome

pub mod binary;
pub mod config;
pub mod process;
pub mod supervisor;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use binary::{resolve_searchd, resolve_searchd_from, searchd_file_name};
pub use config::{
    generate, generate_with_encoding, ConfigEncoding, DaemonConfig, ListenSpec, CONFIG_FILENAME,
    DEFAULT_MYSQL_PORT, DEFAULT_PORT, STORAGE_DIR,
};
pub use process::{spawn_stopwait, SearchdProcess};
pub use supervisor::{
    Lifecycle, Readiness, StartHandle, Supervisor, SupervisorExit, SupervisorState, READY_MARKER,
};
