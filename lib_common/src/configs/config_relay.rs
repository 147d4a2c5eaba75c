//! # Relay Configuration
//!
//! One struct, [`Config`], is both the clap command line (with `env`
//! fallbacks) and the serde shape of the JSON config file. All of its fields
//! are optional so that layers can be merged field by field:
//!
//! 1. built-in defaults
//! 2. JSON file (`--config-path` / `RELAY_CONFIG_PATH`, default `walletd_relay.conf`)
//! 3. environment variables and CLI flags
//!
//! [`Config::resolve`] then validates the merged result into a concrete
//! [`RelayConfig`] that is passed to the components at startup.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "walletd_relay.conf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be between 2 and 65534, got {port}")]
    InvalidPort { name: &'static str, port: u16 },

    #[error("socketioPrefix must start with '/', got '{0}'")]
    InvalidPrefix(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(name = "walletd_relay", about = "Relays walletd events to Cube analytics and WebSocket clients", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_LOG_KEEP", help = "Number of previous log files to keep.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "RELAY_ZEROMQ_HOST", help = "Host of the upstream ZeroMQ publisher.")]
    pub zeromq_host: Option<String>,

    #[clap(long, env = "RELAY_ZEROMQ_PORT", help = "Port of the upstream ZeroMQ publisher.")]
    pub zeromq_port: Option<u16>,

    #[clap(long, env = "RELAY_SOCKETIO_HOST", help = "Address the WebSocket server binds to.")]
    pub socketio_host: Option<String>,

    #[clap(long, env = "RELAY_SOCKETIO_PORT", help = "Port the WebSocket server listens on.")]
    pub socketio_port: Option<u16>,

    #[clap(long, env = "RELAY_SOCKETIO_PREFIX", help = "Path prefix accepted for WebSocket clients.")]
    pub socketio_prefix: Option<String>,

    #[clap(long, env = "RELAY_CUBE_HOST", help = "Host of the Cube collector.")]
    pub cube_host: Option<String>,

    #[clap(long, env = "RELAY_CUBE_PORT", help = "Port of the Cube collector.")]
    pub cube_port: Option<u16>,

    #[clap(long, env = "RELAY_CUBE_DATABASE", help = "MongoDB database holding Cube data.")]
    pub cube_database: Option<String>,

    #[clap(long, env = "RELAY_MONGODB_HOST", help = "MongoDB host.")]
    pub mongodb_host: Option<String>,

    #[clap(long, env = "RELAY_MONGODB_PORT", help = "MongoDB port.")]
    pub mongodb_port: Option<u16>,

    #[clap(long, env = "RELAY_MONGODB_DATABASE", help = "MongoDB database the user authenticates against.")]
    pub mongodb_database: Option<String>,

    #[clap(long, env = "RELAY_MONGODB_USER", help = "MongoDB user (optional).")]
    pub mongodb_user: Option<String>,

    #[clap(long, env = "RELAY_MONGODB_PASSWORD", help = "MongoDB password (optional).")]
    pub mongodb_password: Option<String>,

    #[clap(long, env = "RELAY_RECONNECT_BASE_MS", help = "Base delay in milliseconds for upstream reconnect attempts.")]
    pub reconnect_base_ms: Option<u64>,

    #[clap(long, env = "RELAY_RECONNECT_MAX_MS", help = "Maximum delay in milliseconds for upstream reconnect attempts.")]
    pub reconnect_max_ms: Option<u64>,

    #[clap(long, env = "RELAY_IDLE_TIMEOUT_SECS", help = "Reconnect after this many silent seconds (0 disables).")]
    pub idle_timeout_secs: Option<u64>,

    #[clap(long, env = "RELAY_STATS_INTERVAL_SECS", help = "Seconds between stats log lines (0 disables).")]
    pub stats_interval_secs: Option<u64>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_keep: usize,
    pub zeromq_host: String,
    pub zeromq_port: u16,
    pub socketio_host: String,
    pub socketio_port: u16,
    pub socketio_prefix: String,
    pub cube_host: String,
    pub cube_port: u16,
    pub cube_database: String,
    pub mongodb_host: String,
    pub mongodb_port: u16,
    pub mongodb_database: String,
    pub mongodb_user: Option<String>,
    pub mongodb_password: Option<String>,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub idle_timeout: Option<Duration>,
    pub stats_interval: Option<Duration>,
}

impl Config {
    /// The built-in layer.
    pub fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_keep: Some(5),
            zeromq_host: Some("127.0.0.1".to_string()),
            zeromq_port: Some(4001),
            socketio_host: Some("localhost".to_string()),
            socketio_port: Some(4101),
            socketio_prefix: Some("/socket.io".to_string()),
            cube_host: Some("localhost".to_string()),
            cube_port: Some(1080),
            cube_database: Some("cube_development".to_string()),
            mongodb_host: Some("localhost".to_string()),
            mongodb_port: Some(27017),
            mongodb_database: Some("counterwalletd".to_string()),
            reconnect_base_ms: Some(1000),
            reconnect_max_ms: Some(60_000),
            idle_timeout_secs: Some(0),
            stats_interval_secs: Some(60),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep: other.log_keep.or(self.log_keep),
            zeromq_host: other.zeromq_host.or(self.zeromq_host),
            zeromq_port: other.zeromq_port.or(self.zeromq_port),
            socketio_host: other.socketio_host.or(self.socketio_host),
            socketio_port: other.socketio_port.or(self.socketio_port),
            socketio_prefix: other.socketio_prefix.or(self.socketio_prefix),
            cube_host: other.cube_host.or(self.cube_host),
            cube_port: other.cube_port.or(self.cube_port),
            cube_database: other.cube_database.or(self.cube_database),
            mongodb_host: other.mongodb_host.or(self.mongodb_host),
            mongodb_port: other.mongodb_port.or(self.mongodb_port),
            mongodb_database: other.mongodb_database.or(self.mongodb_database),
            mongodb_user: other.mongodb_user.or(self.mongodb_user),
            mongodb_password: other.mongodb_password.or(self.mongodb_password),
            reconnect_base_ms: other.reconnect_base_ms.or(self.reconnect_base_ms),
            reconnect_max_ms: other.reconnect_max_ms.or(self.reconnect_max_ms),
            idle_timeout_secs: other.idle_timeout_secs.or(self.idle_timeout_secs),
            stats_interval_secs: other.stats_interval_secs.or(self.stats_interval_secs),
        }
    }

    /// Validates the merged layers. Fields still unset take the built-in default.
    pub fn resolve(self) -> Result<RelayConfig, ConfigError> {
        let c = Config::defaults().merge(self);

        let port = |name: &'static str, value: Option<u16>| -> Result<u16, ConfigError> {
            let port = value.unwrap_or_default();
            if port > 1 && port < 65535 {
                Ok(port)
            } else {
                Err(ConfigError::InvalidPort { name, port })
            }
        };
        let text = |name: &'static str, value: Option<String>| -> Result<String, ConfigError> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::Empty(name)),
            }
        };
        let positive_secs = |value: Option<u64>| value.filter(|s| *s > 0).map(Duration::from_secs);

        let socketio_prefix = text("socketioPrefix", c.socketio_prefix)?;
        if !socketio_prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(socketio_prefix));
        }

        Ok(RelayConfig {
            log_dir: c.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: c.log_level.unwrap_or_else(|| "info".to_string()),
            log_keep: c.log_keep.unwrap_or(5),
            zeromq_host: text("zeromqHost", c.zeromq_host)?,
            zeromq_port: port("zeromqPort", c.zeromq_port)?,
            socketio_host: text("socketioHost", c.socketio_host)?,
            socketio_port: port("socketioPort", c.socketio_port)?,
            socketio_prefix,
            cube_host: text("cubeHost", c.cube_host)?,
            cube_port: port("cubePort", c.cube_port)?,
            cube_database: text("cubeDatabase", c.cube_database)?,
            mongodb_host: text("mongodbHost", c.mongodb_host)?,
            mongodb_port: port("mongodbPort", c.mongodb_port)?,
            mongodb_database: text("mongodbDatabase", c.mongodb_database)?,
            mongodb_user: c.mongodb_user.filter(|u| !u.is_empty()),
            mongodb_password: c.mongodb_password.filter(|p| !p.is_empty()),
            reconnect_base: Duration::from_millis(c.reconnect_base_ms.unwrap_or(1000)),
            reconnect_max: Duration::from_millis(c.reconnect_max_ms.unwrap_or(60_000)),
            idle_timeout: positive_secs(c.idle_timeout_secs),
            stats_interval: positive_secs(c.stats_interval_secs),
        })
    }
}

/// Reads the JSON layer. A missing file yields an empty layer.
fn read_config_file(path: &PathBuf) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })
}

/// Layers defaults, the config file and `cli` (which already carries the
/// environment fallbacks) and resolves the result.
pub fn load_config_from(cli: Config) -> Result<RelayConfig, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let file_config = read_config_file(&config_file_path)?;
    Config::defaults().merge(file_config).merge(cli).resolve()
}

/// Parses the process arguments and environment, then layers everything.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from(Config::parse())
}
