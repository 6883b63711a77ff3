//! Configuration types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rats_core::prelude::*;
use rats_searchd::{DEFAULT_MYSQL_PORT, DEFAULT_PORT};

/// Which flavour of installation is running.
///
/// Development and test runs keep their state apart from production, and
/// test runs start from empty indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn name(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    /// Test runs purge indexes and binary logs before searchd starts
    pub fn purges_indexes(self) -> bool {
        self == Environment::Test
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(Error::config(format!(
                "unknown environment '{}' (expected production, development or test)",
                other
            ))),
        }
    }
}

/// Application settings (`<control dir>/rats.toml`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub searchd: SearchdSettings,
}

/// Path settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathSettings {
    /// Where indexes live. Empty = the control directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl PathSettings {
    /// Configured data directory, ignoring an empty value
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// searchd settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchdSettings {
    /// Explicit path to the searchd binary. Empty = auto-detect.
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Native protocol port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MySQL protocol port
    #[serde(default = "default_mysql_port")]
    pub mysql_port: u16,

    /// Give up if searchd is not accepting connections after this many
    /// seconds. Unset = wait as long as it takes.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

impl Default for SearchdSettings {
    fn default() -> Self {
        Self {
            binary: None,
            port: default_port(),
            mysql_port: default_mysql_port(),
            startup_timeout_secs: None,
        }
    }
}

impl SearchdSettings {
    pub fn binary(&self) -> Option<&Path> {
        self.binary
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_environment_flags() {
        assert!(Environment::default().is_production());
        assert!(Environment::Test.purges_indexes());
        assert!(!Environment::Development.purges_indexes());
        assert_eq!(Environment::Development.to_string(), "development");
    }

    #[test]
    fn test_searchd_defaults() {
        let searchd = SearchdSettings::default();
        assert_eq!(searchd.port, 9312);
        assert_eq!(searchd.mysql_port, 9306);
        assert!(searchd.startup_timeout().is_none());
        assert!(searchd.binary().is_none());
    }

    #[test]
    fn test_empty_values_mean_unset() {
        let settings: Settings = toml::from_str(
            r#"
[paths]
data_dir = ""

[searchd]
binary = ""
startup_timeout_secs = 0
"#,
        )
        .unwrap();
        assert!(settings.paths.data_dir().is_none());
        assert!(settings.searchd.binary().is_none());
        assert!(settings.searchd.startup_timeout().is_none());
    }
}
