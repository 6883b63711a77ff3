//! rats - control plane of the rats desktop search
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::{error, info, warn};

use rats_app::config::{self, AppPaths, Environment};
use rats_app::{ControlContext, Engine};
use rats_core::logging;

/// rats - runs searchd and bridges the UI to the search backend
#[derive(Parser, Debug)]
#[command(name = "rats")]
#[command(about = "Runs searchd and bridges the UI to the search backend", long_about = None)]
struct Args {
    /// Directory for searchd control files, settings and logs
    #[arg(long, value_name = "DIR")]
    control_dir: Option<PathBuf>,

    /// Directory holding the index storage
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Path to the searchd binary
    #[arg(long, value_name = "PATH")]
    searchd: Option<PathBuf>,

    /// production, development or test
    #[arg(long, default_value = "production")]
    env: Environment,

    /// Give up if searchd is not accepting connections after this many seconds
    #[arg(long, value_name = "SECS")]
    startup_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let control = config::resolve_control_dir(args.control_dir.as_deref(), args.env)?;

    // Logs go to the control dir and stderr; stdout carries the bridge
    logging::init(&control.path)?;

    info!("═══════════════════════════════════════════════════════");
    info!("rats starting");
    info!("═══════════════════════════════════════════════════════");
    logging::log_host_info(env!("CARGO_PKG_VERSION"));

    if let Err(e) = config::init_settings_file(&control.path) {
        warn!("Failed to write default settings: {}", e);
    }
    let mut settings = config::load_settings(&control.path);
    if let Some(secs) = args.startup_timeout {
        settings.searchd.startup_timeout_secs = Some(secs);
    }

    let paths = AppPaths::new(args.env, control, args.data_dir.as_deref(), &settings);
    paths.log_summary();

    let explicit_binary = args.searchd.as_deref().or_else(|| settings.searchd.binary());
    let binary = rats_searchd::resolve_searchd(explicit_binary)?;

    let engine = Engine::new(ControlContext::new(paths, settings, binary));
    rats_app::spawn_stdio(engine.bridge(), engine.call_sender(), engine.trigger_sender());
    rats_app::spawn_signal_handler(engine.trigger_sender());

    let result = engine.run().await;

    if let Err(ref e) = result {
        error!("Application error: {}", e);
    }

    info!("rats exiting");
    Ok(result?)
}
