//! Command-line argument parsing for the GhostNet server.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// GhostNet server command-line arguments.
///
/// CLI values override settings loaded from `ghostnet.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "ghostnet-server", about = "GhostNet multiplayer ghost server")]
pub struct CliArgs {
    /// Address to bind the listener and update socket to.
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Port for both the TCP and the UDP channel.
    #[arg(long)]
    pub port: Option<u16>,

    /// Chat command prefix.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Echo players' own ghosts back to them.
    #[arg(long)]
    pub loopback: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(bind) = args.bind {
            self.server.bind_address = bind;
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref prefix) = args.prefix {
            self.commands.prefix = prefix.clone();
        }
        if args.loopback {
            self.server.allow_loopback_ghost = true;
        }
        if let Some(ref level) = args.log_level {
            self.log.level = level.clone();
        }
    }
}
