//! Configuration structs with sensible defaults and RON persistence.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted config inside the config directory.
const CONFIG_FILE: &str = "ghostnet.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and session settings.
    pub server: ServerSection,
    /// Chat command settings.
    pub commands: CommandConfig,
    /// Emote settings.
    pub emotes: EmoteConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// Listener and session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Address both the management listener and the update socket bind to.
    pub bind_address: IpAddr,
    /// Port shared by the TCP management listener and the UDP update socket.
    pub port: u16,
    /// Whether this instance hosts the server. The first connection of a
    /// hosting instance holds OP.
    pub is_host: bool,
    /// Echo a player's own status and updates back to it.
    pub allow_loopback_ghost: bool,
    /// Maximum size of a single management frame in bytes.
    pub max_frame_size: u32,
    /// Management frames queued for one client before it is dropped as
    /// unresponsive.
    pub outbox_capacity: usize,
    /// How long `tp` waits for the target's session before giving up.
    pub session_query_timeout_ms: u64,
}

/// Chat command settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Chat messages starting with this prefix are run as commands.
    pub prefix: String,
    /// Number of commands listed per `help` page.
    pub help_page_size: usize,
    /// Chat and emote text is truncated to this many characters.
    pub max_text_length: usize,
}

/// Emote settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmoteConfig {
    /// Icon paths offered to players. Empty means [`default_icons`].
    pub icons: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log filter (e.g., "debug", "info,ghostnet_net=trace").
    pub level: String,
}

/// Stock icons used when the allowlist is left empty.
pub fn default_icons() -> Vec<String> {
    [
        "collectables/heartgem/0/spin00",
        "collectables/strawberry",
        "collectables/cassette",
        "feather/feather0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// --- Default implementations ---

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 2782,
            is_host: true,
            allow_loopback_ghost: false,
            max_frame_size: 64 * 1024,
            outbox_capacity: 256,
            session_query_timeout_ms: 5000,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            help_page_size: 8,
            max_text_length: 128,
        }
    }
}

impl Default for EmoteConfig {
    fn default() -> Self {
        Self {
            icons: default_icons(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerSection {
    /// Socket address for both the TCP listener and the UDP socket.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Session query timeout as a [`Duration`].
    pub fn session_query_timeout(&self) -> Duration {
        Duration::from_millis(self.session_query_timeout_ms)
    }
}

impl EmoteConfig {
    /// The effective icon allowlist.
    pub fn icons(&self) -> Vec<String> {
        if self.icons.is_empty() {
            default_icons()
        } else {
            self.icons.clone()
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory (`<config_dir>/ghostnet`).
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("ghostnet"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `ghostnet.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 2782"));
        assert!(ron_str.contains("prefix: \"/\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(server: (port: 4000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.commands, CommandConfig::default());
        assert_eq!(config.server.max_frame_size, 64 * 1024);
        assert_eq!(config.server.outbox_capacity, 256);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_empty_icon_list_falls_back_to_defaults() {
        let emotes = EmoteConfig { icons: Vec::new() };
        assert_eq!(emotes.icons(), default_icons());

        let custom = EmoteConfig {
            icons: vec!["hearts".to_string()],
        };
        assert_eq!(custom.icons(), vec!["hearts".to_string()]);
    }

    #[test]
    fn test_socket_addr_and_timeout() {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".parse().unwrap();
        config.server.port = 9000;
        config.server.session_query_timeout_ms = 250;
        assert_eq!(
            config.server.socket_addr(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.server.session_query_timeout(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.port = 4444;
        config.commands.prefix = "!".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.commands.help_page_size = 4;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().commands.help_page_size, 4);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
