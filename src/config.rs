//! Configuration module for the chatter server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "chatter-server")]
#[command(author = "chatter-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP chat server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on [default: 4000]
    #[arg(long)]
    pub port: Option<String>,

    /// Address to bind to [default: 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Directory receiving per-client log files [default: .]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Per-connection timing
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Silence period after which the watchdog disconnects a client
    #[serde(default = "default_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Deadline applied to every individual read
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// How long a client may refuse to accept a reply before it is dropped
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_client_log_dir")]
    pub client_log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            client_log_dir: default_client_log_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> String {
    "4000".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_client_log_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: toml_config.server.max_connections,
            idle_timeout: Duration::from_secs(toml_config.session.idle_timeout_secs),
            read_timeout: Duration::from_secs(toml_config.session.read_timeout_secs),
            write_timeout: Duration::from_secs(toml_config.session.write_timeout_secs),
            log_dir: cli.log_dir.unwrap_or(toml_config.logging.client_log_dir),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Address handed to the listener, e.g. `0.0.0.0:4000` or `[::1]:4000`.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("chatter-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default());
        assert_eq!(config.port, "4000");
        assert_eq!(config.listen_addr(), "0.0.0.0:4000");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.write_timeout, Duration::from_secs(30));
        assert_eq!(config.log_dir, PathBuf::from("."));
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = "5000"
            workers = 4

            [session]
            idle_timeout_secs = 10
            write_timeout_secs = 5

            [logging]
            level = "debug"
            client_log_dir = "/var/log/chatter"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, "5000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.session.idle_timeout_secs, 10);
        assert_eq!(config.session.read_timeout_secs, 30);
        assert_eq!(config.session.write_timeout_secs, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.client_log_dir,
            PathBuf::from("/var/log/chatter")
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str("[server]\nport = \"5000\"\n").unwrap();
        let config = Config::merge(cli(&["--port", "6000", "--log-dir", "logs"]), file);
        assert_eq!(config.port, "6000");
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = Config::merge(cli(&["--host", "::1", "--port", "4001"]), TomlConfig::default());
        assert_eq!(config.listen_addr(), "[::1]:4001");
    }
}
