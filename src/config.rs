//! Configuration module for the pinboard server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::address::{AddressError, Ipv4Address};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the board server
#[derive(Parser, Debug)]
#[command(name = "pinboard")]
#[command(version)]
#[command(about = "A minimal line-oriented message board server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (values above 65535 wrap to 16 bits)
    pub port: u64,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Listen backlog
    #[arg(short, long)]
    pub backlog: Option<i32>,

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
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Events fetched per readiness wait
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Longest accepted command line, in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            max_events: default_max_events(),
            max_line_length: default_max_line_length(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    128
}

fn default_max_events() -> usize {
    64
}

fn default_max_line_length() -> usize {
    64 * 1024 // 64 KB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Ipv4Address,
    pub port: u16,
    pub backlog: i32,
    pub max_events: usize,
    pub max_line_length: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host = cli.host.unwrap_or(toml_config.server.host);
        let host = Ipv4Address::parse(&host).map_err(|e| ConfigError::InvalidHost(host, e))?;

        Ok(Config {
            host,
            // Out-of-range ports wrap rather than being rejected
            port: (cli.port & 0xFFFF) as u16,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_events: toml_config.server.max_events.max(1),
            max_line_length: toml_config.server.max_line_length,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}", path = .0.display(), source = .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{path}': {source}", path = .0.display(), source = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid host '{0}': {1}")]
    InvalidHost(String, #[source] AddressError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("pinboard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.max_events, 64);
        assert_eq!(config.server.max_line_length, 64 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            backlog = 16
            max_line_length = 512

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.max_events, 64);
        assert_eq!(config.server.max_line_length, 512);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_port_is_required() {
        assert!(CliArgs::try_parse_from(["pinboard"]).is_err());
        assert!(CliArgs::try_parse_from(["pinboard", "http"]).is_err());
    }

    #[test]
    fn test_port_truncates_to_16_bits() {
        let config = Config::merge(cli(&["8080"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 8080);

        let config = Config::merge(cli(&["65537"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 1);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            host = "10.0.0.1"
            backlog = 16

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["9000", "--host", "127.0.0.1", "--log-level", "trace"]),
            file,
        )
        .unwrap();
        assert_eq!(config.host.as_str(), "127.0.0.1");
        assert_eq!(config.backlog, 16);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::FileRead(
            PathBuf::from("/etc/pinboard.toml"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        let text = err.to_string();
        assert!(text.starts_with("Failed to read config file '/etc/pinboard.toml': "));
        assert!(std::error::Error::source(&err).is_some());

        let parse_err = toml::from_str::<TomlConfig>("[server]\nbacklog = \"many\"").unwrap_err();
        let err = ConfigError::TomlParse(PathBuf::from("board.toml"), parse_err);
        assert!(err
            .to_string()
            .starts_with("Failed to parse config file 'board.toml': "));
    }

    #[test]
    fn test_invalid_host() {
        let result = Config::merge(cli(&["9000", "--host", "not-an-ip"]), TomlConfig::default());
        assert!(matches!(result, Err(ConfigError::InvalidHost(..))));
    }
}
