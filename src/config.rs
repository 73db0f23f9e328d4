//! Configuration module for the identd responder.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the ident responder
#[derive(Parser, Debug)]
#[command(name = "identd")]
#[command(author = "identd authors")]
#[command(version = "0.1.0")]
#[command(about = "An RFC 1413 identification protocol responder", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:113)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Path to the kernel TCP connection table
    #[arg(long)]
    pub table: Option<PathBuf>,

    /// Seconds to wait for a query before dropping the connection
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub lookup: LookupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Query read deadline in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            read_timeout: default_read_timeout(),
        }
    }
}

/// Connection table lookup configuration
#[derive(Debug, Deserialize)]
pub struct LookupConfig {
    /// Kernel TCP table to scan
    #[serde(default = "default_table_path")]
    pub table_path: PathBuf,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            table_path: default_table_path(),
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

fn default_listen() -> String {
    "0.0.0.0:113".to_string()
}

fn default_read_timeout() -> u64 {
    60 // RFC 1413 suggests 60-180 seconds
}

fn default_table_path() -> PathBuf {
    PathBuf::from("/proc/net/tcp")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub table_path: PathBuf,
    pub read_timeout: Duration,
    pub workers: Option<usize>,
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
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen))?;

        Ok(Config {
            listen,
            table_path: cli.table.unwrap_or(toml_config.lookup.table_path),
            read_timeout: Duration::from_secs(
                cli.read_timeout.unwrap_or(toml_config.server.read_timeout),
            ),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{}'", addr)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("identd").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:113");
        assert_eq!(config.server.read_timeout, 60);
        assert_eq!(config.lookup.table_path, PathBuf::from("/proc/net/tcp"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:1113"
            workers = 2
            read_timeout = 30

            [lookup]
            table_path = "/tmp/tcp"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:1113");
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.server.read_timeout, 30);
        assert_eq!(config.lookup.table_path, PathBuf::from("/tmp/tcp"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:113");
        assert_eq!(config.lookup.table_path, PathBuf::from("/proc/net/tcp"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:1113"
            read_timeout = 30
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["-l", "127.0.0.1:2113", "--read-timeout", "5", "--log-level", "debug"]),
            file,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:2113".parse().unwrap());
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.table_path, PathBuf::from("/proc/net/tcp"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_explicit_default_log_level_overrides_file() {
        let file: TomlConfig = toml::from_str("[logging]\nlevel = \"debug\"\n").unwrap();
        let config = Config::merge(cli(&["--log-level", "info"]), file).unwrap();
        assert_eq!(config.log_level, "info");

        let file: TomlConfig = toml::from_str("[logging]\nlevel = \"debug\"\n").unwrap();
        let config = Config::merge(cli(&[]), file).unwrap();
        assert_eq!(config.log_level, "debug");

        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_listen_address() {
        let err = Config::merge(cli(&["-l", "not-an-address"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(ref a) if a == "not-an-address"));
    }
}
