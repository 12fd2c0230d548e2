use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use ironsync::config::{self, Defaults};
use ironsync::sync::DEFAULT_TICK;
use ironsync::Scheduler;

/// Command-line interface for ironsync
#[derive(Parser, Debug)]
#[command(name = "ironsync", version, about = "Mirror remote files onto the local filesystem")]
struct Cli {
    /// Connection definitions (TOML)
    #[arg(long, value_name = "FILE", default_value = "conn.toml")]
    connfile: PathBuf,

    /// Resource definitions (TOML)
    #[arg(long, value_name = "FILE", default_value = "res.toml")]
    resfile: PathBuf,

    /// Milliseconds between two scans of a connection's resources
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TICK.as_millis() as u64)]
    tick_ms: u64,

    /// Stage downloads in this directory instead of next to each target
    #[arg(long, value_name = "DIR")]
    staging_dir: Option<PathBuf>,

    /// Default seconds before retrying a failed resource
    #[arg(long, value_name = "SECS")]
    retry_interval: Option<u64>,
}

fn main() {
    // Initialize logging using env_logger and IRONSYNC_LOG
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("IRONSYNC_LOG", "info")).init();

    let cli = Cli::parse();
    info!("ironsync {} starting", env!("CARGO_PKG_VERSION"));

    let mut defaults = Defaults {
        staging_dir: cli.staging_dir,
        ..Defaults::default()
    };
    if let Some(secs) = cli.retry_interval {
        defaults.retry_interval = Duration::from_secs(secs);
    }

    let connections = match config::load(&cli.connfile, &cli.resfile, &defaults) {
        Ok(connections) => connections,
        Err(e) => {
            error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let scheduler = match Scheduler::start(connections, Duration::from_millis(cli.tick_ms.max(1))) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to start workers: {e}");
            process::exit(1);
        }
    };
    if scheduler.is_empty() {
        error!("No connection has any resources");
        process::exit(1);
    }
    info!("Started {} connection worker(s)", scheduler.len());
    scheduler.wait();
}
