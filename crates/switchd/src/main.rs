use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use switchd::{Daemon, DaemonConfig};
use switchd_provider::SimProvider;
use switchd_types::MacAddress;

#[derive(Parser)]
#[command(name = "switchd", about = "Switch platform reconciliation daemon")]
struct Args {
    /// Log level filter.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Statistics refresh interval in milliseconds.
    #[arg(long, default_value_t = 5000)]
    stats_interval: u64,

    /// System MAC used when no port supplies one.
    #[arg(long, default_value = "00:01:02:03:04:05")]
    system_mac: String,

    /// JSON configuration snapshot to load at startup.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    let system_mac = match args.system_mac.parse::<MacAddress>() {
        Ok(mac) => mac,
        Err(err) => {
            error!("bad system MAC {}: {}", args.system_mac, err);
            return ExitCode::FAILURE;
        }
    };

    let provider = Arc::new(SimProvider::new());
    let mut daemon = Daemon::new(
        provider,
        DaemonConfig {
            stats_interval_ms: args.stats_interval,
            system_mac,
        },
    );

    if let Some(path) = &args.config {
        if let Err(err) = switchd::daemon::load_config_file(daemon.store_mut(), path) {
            error!("failed to load {}: {}", path.display(), err);
            return ExitCode::FAILURE;
        }
    }

    tokio::select! {
        _ = daemon.run() => {}
        _ = tokio::signal::ctrl_c() => info!("received interrupt, shutting down"),
    }
    ExitCode::SUCCESS
}
