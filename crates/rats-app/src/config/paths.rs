//! Control and data directory resolution
//!
//! - control dir: `sphinx.conf`, pid file, searchd logs, binary logs,
//!   `rats.toml` and `rats.log`
//! - data dir: the index storage (`<data dir>/database`)

use std::path::{Path, PathBuf};

use super::types::{Environment, Settings};
use rats_core::prelude::*;
use rats_searchd::DaemonConfig;

/// Per-user directory name of a production install
pub const APP_DIR_NAME: &str = "rats-search";

/// A directory with this name next to the executable turns on portable mode
pub const PORTABLE_DIR: &str = "data";

/// Resolved control directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDir {
    pub path: PathBuf,
    /// State lives next to the executable instead of the user profile
    pub portable: bool,
}

/// Control directory name for an environment: non-production environments
/// are kept apart with a ` (<env>)` suffix.
pub fn control_dir_name(env: Environment) -> String {
    if env.is_production() {
        APP_DIR_NAME.to_string()
    } else {
        format!("{} ({})", APP_DIR_NAME, env)
    }
}

/// Portable control directory, if this is a production run with
/// `<exe dir>/data` present
pub fn portable_dir(env: Environment, exe_dir: Option<&Path>) -> Option<PathBuf> {
    if !env.is_production() {
        return None;
    }
    exe_dir
        .map(|dir| dir.join(PORTABLE_DIR))
        .filter(|dir| dir.is_dir())
}

/// Resolve the control directory for this process
pub fn resolve_control_dir(explicit: Option<&Path>, env: Environment) -> Result<ControlDir> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_control_dir_from(explicit, env, exe_dir.as_deref(), dirs::data_dir())
}

/// Resolution order:
/// 1. An explicit directory (`--control-dir`)
/// 2. Portable mode (`<exe dir>/data`, production only)
/// 3. `<user data dir>/rats-search[ (<env>)]`
pub fn resolve_control_dir_from(
    explicit: Option<&Path>,
    env: Environment,
    exe_dir: Option<&Path>,
    user_data_dir: Option<PathBuf>,
) -> Result<ControlDir> {
    if let Some(path) = explicit {
        return Ok(ControlDir {
            path: path.to_path_buf(),
            portable: false,
        });
    }

    if let Some(path) = portable_dir(env, exe_dir) {
        return Ok(ControlDir {
            path,
            portable: true,
        });
    }

    let base = user_data_dir
        .ok_or_else(|| Error::config("cannot determine the user data directory"))?;
    Ok(ControlDir {
        path: base.join(control_dir_name(env)),
        portable: false,
    })
}

/// Pick the data directory.
///
/// The configured directory wins unless it is missing while the control
/// directory exists (e.g. an unplugged drive), in which case the control
/// directory is used.
pub fn resolve_data_dir(control_dir: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) if dir.exists() || !control_dir.exists() => dir.to_path_buf(),
        Some(dir) => {
            warn!(
                "Data directory {} does not exist, using {}",
                dir.display(),
                control_dir.display()
            );
            control_dir.to_path_buf()
        }
        None => control_dir.to_path_buf(),
    }
}

/// Every path the control plane works with
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub environment: Environment,
    pub control_dir: PathBuf,
    pub data_dir: PathBuf,
    pub portable: bool,
}

impl AppPaths {
    /// Combine a resolved control dir with the data dir from the command
    /// line or settings
    pub fn new(
        environment: Environment,
        control: ControlDir,
        data_dir_override: Option<&Path>,
        settings: &Settings,
    ) -> Self {
        let configured = data_dir_override.or_else(|| settings.paths.data_dir());
        let data_dir = resolve_data_dir(&control.path, configured);
        Self {
            environment,
            control_dir: control.path,
            data_dir,
            portable: control.portable,
        }
    }

    /// searchd configuration for these paths
    pub fn daemon_config(&self, settings: &Settings) -> DaemonConfig {
        DaemonConfig::new(&self.control_dir, &self.data_dir)
            .with_ports(settings.searchd.port, settings.searchd.mysql_port)
            .with_test_mode(self.environment.purges_indexes())
    }

    pub fn log_summary(&self) {
        info!("Environment: {}", self.environment);
        if self.portable {
            info!("Portable mode");
        }
        info!("Control directory: {}", self.control_dir.display());
        info!("Data directory: {}", self.data_dir.display());
    }
}
