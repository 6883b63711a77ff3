//! Settings parser for rats.toml

use std::path::Path;

use super::types::Settings;
use rats_core::prelude::*;

pub const SETTINGS_FILENAME: &str = "rats.toml";

/// Load settings from `<control_dir>/rats.toml`
pub fn load_settings(control_dir: &Path) -> Settings {
    let path = control_dir.join(SETTINGS_FILENAME);

    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Write a commented default `rats.toml` unless one exists
pub fn init_settings_file(control_dir: &Path) -> Result<()> {
    if !control_dir.exists() {
        std::fs::create_dir_all(control_dir)
            .map_err(|e| Error::config(format!("Failed to create control dir: {}", e)))?;
    }

    let path = control_dir.join(SETTINGS_FILENAME);
    if path.exists() {
        return Ok(());
    }

    let default_content = r#"# rats search settings

[paths]
# Where indexes live (empty = this directory)
data_dir = ""

[searchd]
binary = ""             # Empty = next to the executable, then PATH
port = 9312
mysql_port = 9306
# startup_timeout_secs = 60   # Unset = wait for searchd as long as it takes
"#;
    std::fs::write(&path, default_content)
        .map_err(|e| Error::config(format!("Failed to write {}: {}", path.display(), e)))?;
    debug!("Wrote default settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert!(settings.paths.data_dir().is_none());
        assert_eq!(settings.searchd.port, 9312);
        assert_eq!(settings.searchd.mysql_port, 9306);
        assert!(settings.searchd.startup_timeout().is_none());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let config = r#"
[paths]
data_dir = "/mnt/big/rats"

[searchd]
port = 19312
startup_timeout_secs = 45
"#;
        std::fs::write(temp.path().join(SETTINGS_FILENAME), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(
            settings.paths.data_dir(),
            Some(Path::new("/mnt/big/rats"))
        );
        assert_eq!(settings.searchd.port, 19312);
        // Unspecified keys keep their defaults
        assert_eq!(settings.searchd.mysql_port, 9306);
        assert_eq!(
            settings.searchd.startup_timeout(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(SETTINGS_FILENAME), "not valid toml {{{{").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.searchd.port, 9312);
    }

    #[test]
    fn test_init_settings_file() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("rats-search");

        init_settings_file(&dir).unwrap();

        let content = std::fs::read_to_string(dir.join(SETTINGS_FILENAME)).unwrap();
        let settings: Settings = toml::from_str(&content).expect("default settings are valid TOML");
        assert!(settings.paths.data_dir().is_none());
        assert_eq!(settings.searchd.port, 9312);
    }

    #[test]
    fn test_init_settings_file_idempotent() {
        let temp = tempdir().unwrap();
        init_settings_file(temp.path()).unwrap();

        let path = temp.path().join(SETTINGS_FILENAME);
        std::fs::write(&path, "[searchd]\nport = 1\n").unwrap();

        init_settings_file(temp.path()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("port = 1"));
    }
}
