//! Configuration module for the edge-tcp server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "edge-tcp")]
#[command(author = "edge-tcp authors")]
#[command(version = "0.1.0")]
#[command(about = "An edge-triggered TCP server core", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port or service name to listen on (e.g., 8080)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Local host to bind to (defaults to all interfaces)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum readiness events returned by a single wait
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Bytes requested per read call
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Accept backlog (defaults to the platform maximum)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum simultaneously open connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub event_loop: EventLoopConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port or service name
    #[serde(default = "default_port")]
    pub port: String,
    /// Local host to bind to
    pub host: Option<String>,
    /// Accept backlog
    pub backlog: Option<i32>,
    /// Set SO_REUSEADDR before binding
    #[serde(default = "default_reuse_address")]
    pub reuse_address: bool,
    /// Maximum simultaneously open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: None,
            backlog: None,
            reuse_address: default_reuse_address(),
            max_connections: default_max_connections(),
        }
    }
}

/// Event loop sizing
#[derive(Debug, Deserialize)]
pub struct EventLoopConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> String {
    "8080".to_string()
}

fn default_reuse_address() -> bool {
    true
}

fn default_max_connections() -> usize {
    1024
}

fn default_batch_size() -> usize {
    64
}

fn default_chunk_size() -> usize {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub host: Option<String>,
    /// `None` means the platform maximum.
    pub backlog: Option<i32>,
    pub reuse_address: bool,
    pub max_connections: usize,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Build configuration from already-parsed CLI arguments.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::resolve(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            host: cli.host.or(toml_config.server.host),
            backlog: cli.backlog.or(toml_config.server.backlog),
            reuse_address: toml_config.server.reuse_address,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            batch_size: cli
                .batch_size
                .unwrap_or(toml_config.event_loop.batch_size),
            chunk_size: cli
                .chunk_size
                .unwrap_or(toml_config.event_loop.chunk_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than zero"));
        }
        // A zero-length read returns 0, which would look like end-of-stream.
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl CliArgs {
    fn empty() -> Self {
        Self {
            config: None,
            port: None,
            host: None,
            batch_size: None,
            chunk_size: None,
            backlog: None,
            max_connections: None,
            log_level: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, "8080");
        assert_eq!(config.host, None);
        assert_eq!(config.backlog, None);
        assert!(config.reuse_address);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            port = "9000"
            host = "127.0.0.1"
            backlog = 16
            reuse_address = false

            [event_loop]
            batch_size = 128
            chunk_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, "9000");
        assert_eq!(config.server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.server.backlog, Some(16));
        assert!(!config.server.reuse_address);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.event_loop.batch_size, 128);
        assert_eq!(config.event_loop.chunk_size, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = "9000"

            [event_loop]
            chunk_size = 1024
            "#,
        )
        .unwrap();
        let cli = CliArgs::try_parse_from(["edge-tcp", "--port", "7000", "--log-level", "trace"])
            .unwrap();

        let config = Config::resolve(cli, toml_config);
        assert_eq!(config.port, "7000");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cli = CliArgs::try_parse_from(["edge-tcp", "--chunk-size", "0"]).unwrap();
        let err = Config::from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let cli =
            CliArgs::try_parse_from(["edge-tcp", "--config", "/nonexistent/edge-tcp.toml"]).unwrap();
        let err = Config::from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
