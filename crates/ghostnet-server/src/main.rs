//! GhostNet server binary.
//!
//! Loads `ghostnet.ron` (creating it with defaults on first run), applies
//! command-line overrides, then serves until Ctrl-C.
//!
//! Run with: `cargo run -p ghostnet-server -- --port 2782`

use clap::Parser;
use ghostnet_config::{CliArgs, Config};
use ghostnet_server::GhostServer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone().map(Ok).unwrap_or_else(Config::default_dir) {
        Ok(dir) => Some(dir),
        Err(e) => {
            eprintln!("No config directory ({e}), using defaults");
            None
        }
    };
    let (mut config, load_error) = match config_dir.as_deref().map(Config::load_or_create) {
        Some(Ok(config)) => (config, None),
        Some(Err(e)) => (Config::default(), Some(e)),
        None => (Config::default(), None),
    };
    config.apply_cli_overrides(&args);

    // JSON log file next to the config in debug builds.
    let log_dir = config_dir.as_ref().map(|dir| dir.join("logs"));
    ghostnet_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));
    if let Some(e) = load_error {
        warn!("Could not load config, using defaults: {e}");
    }

    if !config.server.is_host {
        info!("is_host is off in the config, not starting a server");
        return;
    }

    info!(
        "GhostNet server | bind: {} | prefix: {:?} | loopback: {}",
        config.server.socket_addr(),
        config.commands.prefix,
        config.server.allow_loopback_ghost,
    );

    let mut server = GhostServer::new(config);
    if let Err(e) = server.start().await {
        error!("Could not start server: {e}");
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {e}");
    }
    server.stop().await;
}
