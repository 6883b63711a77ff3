//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to write searchd config to {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config text cannot be encoded as {encoding}: {message}")]
    Encoding {
        encoding: &'static str,
        message: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Search Daemon Errors
    // ─────────────────────────────────────────────────────────────
    #[error("searchd binary not found (looked in: {searched})")]
    SearchdNotFound { searched: String },

    #[error("Failed to spawn searchd: {reason}")]
    ProcessSpawn { reason: String },

    #[error("searchd exited unexpectedly (code: {code:?}, signal: {signal:?})")]
    DaemonCrash {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("searchd did not accept connections within {secs}s")]
    StartupTimeout { secs: u64 },

    #[error("searchd process error: {message}")]
    Process { message: String },

    // ─────────────────────────────────────────────────────────────
    // Bridge Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No handler registered for operation '{name}'")]
    UnknownOperation { name: String },

    #[error("Handler for '{operation}' failed: {message}")]
    Handler { operation: String, message: String },

    #[error("Bridge call '{operation}' timed out")]
    CallTimeout { operation: String },

    #[error("Bridge protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigWrite {
            path: path.into(),
            source,
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn handler(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Per-call bridge failures stay local to the call that raised them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownOperation { .. }
                | Error::Handler { .. }
                | Error::CallTimeout { .. }
                | Error::Protocol { .. }
                | Error::ChannelSend { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::ConfigWrite { .. }
                | Error::Encoding { .. }
                | Error::SearchdNotFound { .. }
                | Error::ProcessSpawn { .. }
                | Error::DaemonCrash { .. }
                | Error::StartupTimeout { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::config("data dir missing");
        assert_eq!(err.to_string(), "Configuration error: data dir missing");

        let err = Error::DaemonCrash {
            code: Some(1),
            signal: None,
        };
        assert!(err.to_string().contains("exited unexpectedly"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_config_write_keeps_path_and_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::config_write("/ro/sphinx.conf", io_err);
        assert!(err.to_string().contains("/ro/sphinx.conf"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::config("x").is_fatal());
        assert!(Error::DaemonCrash {
            code: None,
            signal: Some(9)
        }
        .is_fatal());
        assert!(Error::SearchdNotFound {
            searched: "PATH".into()
        }
        .is_fatal());
        assert!(!Error::handler("ping", "boom").is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::handler("ping", "boom").is_recoverable());
        assert!(Error::UnknownOperation {
            name: "nope".into()
        }
        .is_recoverable());
        assert!(Error::CallTimeout {
            operation: "search".into()
        }
        .is_recoverable());
        assert!(!Error::StartupTimeout { secs: 5 }.is_recoverable());
    }

    #[test]
    fn test_result_ext_preserves_error() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk gone",
        ));
        let err = res.context("writing config").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
