//! Logging configuration using tracing

use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Name of the log file inside the control directory
pub const LOG_FILENAME: &str = "rats.log";

/// Initialize the logging subsystem
///
/// Logs go to `<log_dir>/rats.log` (truncated on every start) and to stderr.
/// Stdout is left alone: the binary uses it for the bridge wire protocol.
/// Log level is controlled by the `RATS_LOG` environment variable.
///
/// # Examples
/// ```bash
/// RATS_LOG=debug rats
/// RATS_LOG=rats_searchd=trace rats
/// ```
pub fn init(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // The appender only ever appends; start each run from an empty file.
    std::fs::File::create(log_dir.join(LOG_FILENAME))?;
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILENAME);

    // Default to info for our crates, allow override via RATS_LOG
    let env_filter = EnvFilter::try_from_env("RATS_LOG").unwrap_or_else(|_| {
        EnvFilter::new("rats=info,rats_core=info,rats_searchd=info,rats_app=info,warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string())),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S".to_string())),
        )
        .init();

    tracing::info!("Log file: {}", log_file(log_dir).display());

    Ok(())
}

/// Path of the log file for a given log directory
pub fn log_file(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILENAME)
}

/// The machine rats runs on, as reported at startup
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    pub platform: &'static str,
    pub arch: &'static str,
    pub os_release: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: usize,
    /// Bytes
    pub total_memory: u64,
    /// Bytes
    pub free_memory: u64,
}

impl HostInfo {
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpu_model = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());
        let cpu_cores = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        Self {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            os_release: System::kernel_version(),
            cpu_model,
            cpu_cores,
            total_memory: system.total_memory(),
            free_memory: system.free_memory(),
        }
    }

    /// One log line per fact
    pub fn lines(&self) -> Vec<String> {
        let unknown = || "unknown".to_string();
        vec![
            format!("Platform: {}", self.platform),
            format!("Arch: {}", self.arch),
            format!("OS Release: {}", self.os_release.clone().unwrap_or_else(unknown)),
            format!("CPU: {}", self.cpu_model.clone().unwrap_or_else(unknown)),
            format!("CPU logical cores: {}", self.cpu_cores),
            format!("Total memory: {:.2} MB", megabytes(self.total_memory)),
            format!("Free memory: {:.2} MB", megabytes(self.free_memory)),
        ]
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Log what we are running on. Useful when reading user-submitted logs.
pub fn log_host_info(version: &str) {
    tracing::info!("rats {}", version);
    tracing::info!("Started: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z"));
    for line in HostInfo::collect().lines() {
        tracing::info!("{}", line);
    }
}
