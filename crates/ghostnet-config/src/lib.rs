//! Configuration for the GhostNet server.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line via clap. Every section uses `#[serde(default)]`, so older
//! or newer config files load without errors.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CommandConfig, Config, EmoteConfig, LogConfig, ServerSection, default_icons};
pub use error::ConfigError;
