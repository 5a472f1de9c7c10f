//! Structured logging for the GhostNet server.
//!
//! Installs a `tracing` subscriber with console output and, optionally, a
//! JSON log file for post-mortem analysis. The filter honours `RUST_LOG`
//! first and falls back to the configured log level.

use ghostnet_config::Config;
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config specify one.
const DEFAULT_FILTER: &str = "info";

/// Initialize the tracing subscriber.
///
/// * `log_dir` - Directory for the JSON log file, if `json_file` is set
/// * `json_file` - Also write structured JSON to `log_dir/ghostnet.log`
/// * `config` - Optional configuration to take the log level from
///
/// # Examples
///
/// ```no_run
/// use ghostnet_log::init_logging;
/// use ghostnet_config::Config;
///
/// let config = Config::default();
/// init_logging(None, false, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, json_file: bool, config: Option<&Config>) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = resolve_filter(env.as_deref(), config);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if json_file
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("ghostnet.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Resolve the filter string from an optional config.
fn filter_from_config(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.log.level.trim().is_empty() => config.log.level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// `RUST_LOG` if it parses, then the configured level, then the default.
fn resolve_filter(env: Option<&str>, config: Option<&Config>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(filter_from_config(config)).ok())
        .unwrap_or_else(default_env_filter)
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
