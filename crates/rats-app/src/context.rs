//! Explicit wiring of the long-lived components

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rats_searchd::{DaemonConfig, Supervisor};

use crate::bridge::Bridge;
use crate::config::{AppPaths, Settings};
use crate::shutdown::{DaemonControl, ShutdownCoordinator};

/// Everything the engine and the handlers share, passed around explicitly
#[derive(Debug)]
pub struct ControlContext {
    pub paths: AppPaths,
    pub settings: Settings,
    pub supervisor: Arc<Supervisor>,
    pub bridge: Arc<Bridge>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl ControlContext {
    pub fn new(paths: AppPaths, settings: Settings, searchd_binary: impl Into<PathBuf>) -> Self {
        let supervisor = Arc::new(Supervisor::new(searchd_binary));
        let daemon: Arc<dyn DaemonControl> = supervisor.clone();
        Self {
            paths,
            settings,
            supervisor,
            bridge: Arc::new(Bridge::new()),
            shutdown: Arc::new(ShutdownCoordinator::new(daemon)),
        }
    }

    /// Fresh searchd configuration; rendered on every start
    pub fn daemon_config(&self) -> DaemonConfig {
        self.paths.daemon_config(&self.settings)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.settings.searchd.startup_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlDir, Environment};

    #[test]
    fn test_context_wires_components() {
        let temp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.searchd.startup_timeout_secs = Some(3);

        let paths = AppPaths::new(
            Environment::Development,
            ControlDir {
                path: temp.path().to_path_buf(),
                portable: false,
            },
            None,
            &settings,
        );
        let ctx = ControlContext::new(paths, settings, "/opt/rats/searchd");

        assert_eq!(ctx.supervisor.binary(), std::path::Path::new("/opt/rats/searchd"));
        assert!(!ctx.supervisor.is_started());
        assert!(!ctx.shutdown.is_in_progress());
        assert_eq!(ctx.startup_timeout(), Some(Duration::from_secs(3)));
        assert!(!ctx.daemon_config().test_mode);
        assert_eq!(ctx.daemon_config().config_path(), temp.path().join("sphinx.conf"));
    }
}
