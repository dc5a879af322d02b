#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tollgate_lib::config::load_from_path;
use tollgate_lib::telemetry::init_tracing;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tollgate multi-tenant API gateway")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TOLLGATE_CONFIG",
        default_value = "config/tollgate.toml"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            // no subscriber yet: the log level lives in the file we failed to load
            eprintln!("failed to load configuration from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialise tracing: {err}");
        std::process::exit(1);
    }

    info!(?cfg.listen, services = cfg.services.len(), "configuration loaded");
    if let Err(err) = tollgate_lib::run(Arc::new(cfg)).await {
        error!(%err, "gateway exited with error");
        std::process::exit(1);
    }
}
