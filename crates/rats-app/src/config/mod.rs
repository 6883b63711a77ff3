//! Configuration for the rats control plane
//!
//! Supports:
//! - `<control dir>/rats.toml` - Settings
//! - Environment-specific and portable control directories

pub mod paths;
pub mod settings;
pub mod types;

pub use paths::{
    control_dir_name, portable_dir, resolve_control_dir, resolve_control_dir_from,
    resolve_data_dir, AppPaths, ControlDir, APP_DIR_NAME, PORTABLE_DIR,
};
pub use settings::{init_settings_file, load_settings, SETTINGS_FILENAME};
pub use types::*;
