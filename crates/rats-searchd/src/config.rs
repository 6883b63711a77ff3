//! searchd configuration generation
//!
//! Renders `sphinx.conf` for the three real-time indexes the application
//! uses, makes sure the index storage directory exists, and writes the file in
//! the encoding searchd's config parser expects on the host platform.

use std::fmt;
use std::path::{Path, PathBuf};

use rats_core::prelude::*;

/// Config file written into the control directory
pub const CONFIG_FILENAME: &str = "sphinx.conf";

/// Index storage subdirectory of the data directory
pub const STORAGE_DIR: &str = "database";

/// Prefix of searchd's binary-log files in the control directory
pub const BINLOG_PREFIX: &str = "binlog";

/// Native searchd protocol port
pub const DEFAULT_PORT: u16 = 9312;

/// MySQL-compatible (SphinxQL) port
pub const DEFAULT_MYSQL_PORT: u16 = 9306;

// ─────────────────────────────────────────────────────────────────────────────
// Index schemas
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a real-time index column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    String,
    /// Full-text field (indexed, not stored)
    Field,
    Uint,
    Bigint,
    Timestamp,
}

impl AttrKind {
    fn directive(self) -> &'static str {
        match self {
            AttrKind::String => "rt_attr_string",
            AttrKind::Field => "rt_field",
            AttrKind::Uint => "rt_attr_uint",
            AttrKind::Bigint => "rt_attr_bigint",
            AttrKind::Timestamp => "rt_attr_timestamp",
        }
    }
}

/// A real-time index declaration
#[derive(Debug, Clone, Copy)]
pub struct IndexSchema {
    pub name: &'static str,
    pub attrs: &'static [(AttrKind, &'static str)],
}

/// Torrent records
pub const TORRENTS_INDEX: IndexSchema = IndexSchema {
    name: "torrents",
    attrs: &[
        (AttrKind::String, "hash"),
        (AttrKind::String, "name"),
        (AttrKind::Field, "nameIndex"),
        (AttrKind::Bigint, "size"),
        (AttrKind::Uint, "files"),
        (AttrKind::Uint, "piecelength"),
        (AttrKind::Timestamp, "added"),
        (AttrKind::String, "ipv4"),
        (AttrKind::Uint, "port"),
        (AttrKind::String, "contentType"),
        (AttrKind::String, "contentCategory"),
        (AttrKind::Uint, "seeders"),
        (AttrKind::Uint, "leechers"),
        (AttrKind::Uint, "completed"),
        (AttrKind::Timestamp, "trackersChecked"),
        (AttrKind::Uint, "good"),
        (AttrKind::Uint, "bad"),
    ],
};

/// Files belonging to torrents
pub const FILES_INDEX: IndexSchema = IndexSchema {
    name: "files",
    attrs: &[
        (AttrKind::String, "path"),
        (AttrKind::Field, "pathIndex"),
        (AttrKind::String, "hash"),
        (AttrKind::Bigint, "size"),
    ],
};

/// Aggregate statistics
pub const STATISTIC_INDEX: IndexSchema = IndexSchema {
    name: "statistic",
    attrs: &[
        (AttrKind::Bigint, "size"),
        (AttrKind::Bigint, "files"),
        (AttrKind::Uint, "torrents"),
    ],
};

/// All indexes, in the order they appear in the config
pub const INDEXES: [IndexSchema; 3] = [TORRENTS_INDEX, FILES_INDEX, STATISTIC_INDEX];

// ─────────────────────────────────────────────────────────────────────────────
// Daemon config
// ─────────────────────────────────────────────────────────────────────────────

/// One `listen = ...` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenSpec {
    pub port: u16,
    /// Wire protocol suffix, e.g. `mysql41`. `None` means native protocol.
    pub protocol: Option<&'static str>,
}

impl ListenSpec {
    pub fn native(port: u16) -> Self {
        Self {
            port,
            protocol: None,
        }
    }

    pub fn mysql41(port: u16) -> Self {
        Self {
            port,
            protocol: Some("mysql41"),
        }
    }
}

impl fmt::Display for ListenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Some(protocol) => write!(f, "{}:{}", self.port, protocol),
            None => write!(f, "{}", self.port),
        }
    }
}

/// Inputs for one rendering of `sphinx.conf`
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Holds the config file, pid file, logs and binary logs
    pub control_dir: PathBuf,
    /// Holds the index storage directory
    pub data_dir: PathBuf,
    pub listen: Vec<ListenSpec>,
    /// Purge index files and binary logs before writing (deterministic test runs)
    pub test_mode: bool,
}

impl DaemonConfig {
    pub fn new(control_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            data_dir: data_dir.into(),
            listen: vec![
                ListenSpec::native(DEFAULT_PORT),
                ListenSpec::mysql41(DEFAULT_MYSQL_PORT),
            ],
            test_mode: false,
        }
    }

    pub fn with_ports(mut self, port: u16, mysql_port: u16) -> Self {
        self.listen = vec![ListenSpec::native(port), ListenSpec::mysql41(mysql_port)];
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.control_dir.join(CONFIG_FILENAME)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join(STORAGE_DIR)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.control_dir.join("searchd.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.control_dir.join("searchd.log")
    }

    pub fn query_log(&self) -> PathBuf {
        self.control_dir.join("query.log")
    }

    /// Render the config text
    pub fn render(&self) -> String {
        let mut out = String::new();
        let storage = self.storage_dir();

        for index in &INDEXES {
            out.push_str(&format!("index {}\n{{\n", index.name));
            out.push_str("    type = rt\n");
            out.push_str(&format!(
                "    path = {}\n\n",
                storage.join(index.name).display()
            ));
            for (kind, name) in index.attrs {
                out.push_str(&format!("    {} = {}\n", kind.directive(), name));
            }
            out.push_str("}\n\n");
        }

        out.push_str("searchd\n{\n");
        for spec in &self.listen {
            out.push_str(&format!("    listen = {}\n", spec));
        }
        out.push_str("    read_timeout = 5\n");
        out.push_str("    max_children = 30\n");
        out.push_str("    seamless_rotate = 1\n");
        out.push_str("    preopen_indexes = 1\n");
        out.push_str("    unlink_old = 1\n");
        // RT indexes require the threads worker model
        out.push_str("    workers = threads\n");
        out.push_str(&format!("    pid_file = {}\n", self.pid_file().display()));
        out.push_str(&format!("    log = {}\n", self.log_file().display()));
        out.push_str(&format!("    query_log = {}\n", self.query_log().display()));
        out.push_str(&format!("    binlog_path = {}\n", self.control_dir.display()));
        out.push_str("}\n");

        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Byte encoding of the written config file
///
/// searchd's config parser on Windows is not Unicode-aware and reads the file
/// in the legacy Cyrillic code page, so paths with non-ASCII characters (user
/// profile directories) must be written as Windows-1251 there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEncoding {
    Utf8,
    Windows1251,
}

impl ConfigEncoding {
    /// Pick the encoding for a platform name (`std::env::consts::OS` style)
    pub fn for_platform(os: &str) -> Self {
        if os.starts_with("win") {
            ConfigEncoding::Windows1251
        } else {
            ConfigEncoding::Utf8
        }
    }

    /// Encoding for the platform we are running on
    pub fn host() -> Self {
        Self::for_platform(std::env::consts::OS)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigEncoding::Utf8 => "UTF-8",
            ConfigEncoding::Windows1251 => "windows-1251",
        }
    }

    /// Encode config text. Characters the code page cannot represent are an
    /// error rather than being replaced.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            ConfigEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            ConfigEncoding::Windows1251 => {
                let (bytes, _, had_unmappable) = encoding_rs::WINDOWS_1251.encode(text);
                if had_unmappable {
                    let bad: String = text
                        .chars()
                        .filter(|c| {
                            let mut buf = [0u8; 4];
                            encoding_rs::WINDOWS_1251
                                .encode(c.encode_utf8(&mut buf))
                                .2
                        })
                        .collect();
                    return Err(Error::Encoding {
                        encoding: self.name(),
                        message: format!("unrepresentable characters: {:?}", bad),
                    });
                }
                Ok(bytes.into_owned())
            }
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            ConfigEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| Error::Encoding {
                encoding: self.name(),
                message: e.to_string(),
            }),
            ConfigEncoding::Windows1251 => {
                let (text, had_errors) =
                    encoding_rs::WINDOWS_1251.decode_without_bom_handling(bytes);
                if had_errors {
                    return Err(Error::Encoding {
                        encoding: self.name(),
                        message: "malformed input".to_string(),
                    });
                }
                Ok(text.into_owned())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────────────────

/// Write `sphinx.conf` for the host platform. Returns the config file path.
pub fn generate(config: &DaemonConfig) -> Result<PathBuf> {
    generate_with_encoding(config, ConfigEncoding::host())
}

/// Write `sphinx.conf` using an explicit encoding
pub fn generate_with_encoding(config: &DaemonConfig, encoding: ConfigEncoding) -> Result<PathBuf> {
    if config.test_mode {
        purge_test_artifacts(config);
    }

    let storage = config.storage_dir();
    if !storage.exists() {
        std::fs::create_dir_all(&storage).map_err(|e| {
            Error::config(format!(
                "Failed to create index storage {}: {}",
                storage.display(),
                e
            ))
        })?;
        debug!("Created index storage directory {}", storage.display());
    }

    std::fs::create_dir_all(&config.control_dir)
        .map_err(|e| Error::config_write(&config.control_dir, e))?;

    let bytes = encoding.encode(&config.render())?;
    let path = config.config_path();
    std::fs::write(&path, bytes).map_err(|e| Error::config_write(&path, e))?;

    info!(
        "Wrote searchd config to {} ({})",
        path.display(),
        encoding.name()
    );
    info!("Index storage: {}", storage.display());

    Ok(path)
}

/// Remove index files and binary logs left over from a previous run.
///
/// Each directory is purged on its own and a file that cannot be removed is
/// logged and skipped.
fn purge_test_artifacts(config: &DaemonConfig) {
    let storage = config.storage_dir();
    if storage.exists() {
        let removed = remove_files(&storage, |_| true);
        debug!("Purged {} file(s) from {}", removed, storage.display());
    }

    if config.control_dir.exists() {
        let removed = remove_files(&config.control_dir, |name| name.starts_with(BINLOG_PREFIX));
        debug!("Purged {} binlog file(s)", removed);
    }
}

/// Delete non-directory entries of `dir` whose file name passes `filter`
fn remove_files(dir: &Path, filter: impl Fn(&str) -> bool) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} for purge: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        if !filter(&entry.file_name().to_string_lossy()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}
