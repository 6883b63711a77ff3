//! Domain event definitions

use std::fmt;

/// Raw events produced by a supervised searchd process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// A line of stdout output
    Stdout(String),

    /// A line of stderr output
    Stderr(String),

    /// The process has exited
    Exited {
        code: Option<i32>,
        /// Terminating signal on unix, always `None` elsewhere
        signal: Option<i32>,
    },
}

/// Something that asks the control plane to shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The UI-facing side went away (all windows closed, channel EOF)
    UiClosed,
    /// Explicit quit request, including OS termination signals
    QuitRequested,
    /// searchd exited while it was supposed to be serving
    DaemonCrashed,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownTrigger::UiClosed => "ui closed",
            ShutdownTrigger::QuitRequested => "quit requested",
            ShutdownTrigger::DaemonCrashed => "daemon crashed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_display() {
        assert_eq!(ShutdownTrigger::UiClosed.to_string(), "ui closed");
        assert_eq!(ShutdownTrigger::DaemonCrashed.to_string(), "daemon crashed");
    }
}
