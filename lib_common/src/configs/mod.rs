//! # Configuration Modules
//!
//! Layered configuration for the relay: built-in defaults, an optional JSON
//! file, then environment variables and command-line flags.

/// The relay's configuration struct, its layering and validation.
pub mod config_relay;

pub use config_relay::{load_config, load_config_from, Config, ConfigError, RelayConfig};
