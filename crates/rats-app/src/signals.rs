//! OS signals that ask rats to quit
//!
//! Interrupt, terminate and hangup on unix; Ctrl+C and console close on
//! Windows. Each becomes [`ShutdownTrigger::QuitRequested`].

use tokio::sync::mpsc;

use rats_core::prelude::*;
use rats_core::ShutdownTrigger;

/// Installed signal listeners
pub struct QuitSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
    #[cfg(windows)]
    ctrl_close: tokio::signal::windows::CtrlClose,
}

impl QuitSignals {
    /// Register the listeners. From here on the signals no longer kill the
    /// process; they are delivered to [`QuitSignals::recv`].
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let listen = |kind: SignalKind, name: &str| {
            signal(kind)
                .map_err(|e| Error::process(format!("Failed to listen for {}: {}", name, e)))
        };
        Ok(Self {
            interrupt: listen(SignalKind::interrupt(), "SIGINT")?,
            terminate: listen(SignalKind::terminate(), "SIGTERM")?,
            hangup: listen(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    #[cfg(windows)]
    pub fn install() -> Result<Self> {
        use tokio::signal::windows;

        Ok(Self {
            ctrl_c: windows::ctrl_c()
                .map_err(|e| Error::process(format!("Failed to listen for Ctrl+C: {}", e)))?,
            ctrl_close: windows::ctrl_close()
                .map_err(|e| Error::process(format!("Failed to listen for console close: {}", e)))?,
        })
    }

    /// Wait for the next quit signal and name it
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }

    #[cfg(windows)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "Ctrl+C",
            _ = self.ctrl_close.recv() => "console close",
        }
    }
}

/// Install the listeners now and forward every quit signal as a trigger.
///
/// Repeated signals are forwarded too; the shutdown coordinator ignores all
/// but the first trigger.
pub fn spawn_signal_handler(tx: mpsc::Sender<ShutdownTrigger>) {
    let mut signals = match QuitSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Signal handler error: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            let name = signals.recv().await;
            info!("Received {}, requesting shutdown", name);
            if tx.send(ShutdownTrigger::QuitRequested).await.is_err() {
                debug!("Engine gone, signal handler finished");
                return;
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    fn send_to_self(signal: &str) {
        let status = std::process::Command::new("kill")
            .arg(format!("-{}", signal))
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    #[serial]
    async fn test_names_the_signal_received() {
        let mut signals = QuitSignals::install().unwrap();

        send_to_self("TERM");
        let name = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");

        send_to_self("HUP");
        let name = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGHUP");
    }

    #[tokio::test]
    #[serial]
    async fn test_each_signal_becomes_quit_request() {
        let (tx, mut rx) = mpsc::channel::<ShutdownTrigger>(4);
        spawn_signal_handler(tx);

        // Nothing before a signal arrives
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());

        send_to_self("INT");
        send_to_self("TERM");

        for _ in 0..2 {
            let trigger = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap();
            assert_eq!(trigger, Some(ShutdownTrigger::QuitRequested));
        }
    }
}
