//! Configuration module for quantisd.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "quantisd")]
#[command(author = "quantisd authors")]
#[command(version = "0.1.0")]
#[command(about = "Serves hardware random numbers over a Unix domain socket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Filesystem path of the listening socket (e.g., /tmp/quantisd)
    #[arg(short = 's', long)]
    pub socket: Option<PathBuf>,

    /// Entropy device node to read random bytes from
    #[arg(short = 'd', long)]
    pub device: Option<PathBuf>,

    /// Maximum number of simultaneously connected clients
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Upper bound on a single readiness wait, in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Close a connection whose request stalls this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

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
    pub entropy: EntropyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Socket path to bind to
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Connection pool capacity
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness wait bound in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Stalled request timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            max_connections: default_max_connections(),
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Entropy source configuration
#[derive(Debug, Deserialize)]
pub struct EntropyConfig {
    /// Device node of the random number generator
    #[serde(default = "default_device")]
    pub device: PathBuf,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
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

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/quantisd")
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/qrandom0")
}

fn default_max_connections() -> usize {
    16
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: PathBuf,
    pub device: PathBuf,
    pub max_connections: usize,
    pub poll_timeout: Duration,
    /// `None` disables the stalled-request timeout.
    pub idle_timeout: Option<Duration>,
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

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }

        let idle_secs = cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout);

        Ok(Config {
            socket: cli.socket.unwrap_or(toml_config.server.socket),
            device: cli.device.unwrap_or(toml_config.entropy.device),
            max_connections,
            poll_timeout: Duration::from_millis(
                cli.poll_timeout_ms
                    .unwrap_or(toml_config.server.poll_timeout_ms),
            ),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("quantisd").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.socket, PathBuf::from("/tmp/quantisd"));
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.poll_timeout_ms, 2000);
        assert_eq!(config.entropy.device, PathBuf::from("/dev/qrandom0"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            socket = "/run/quantisd.sock"
            max_connections = 4
            idle_timeout = 0

            [entropy]
            device = "/dev/hwrng"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.socket, PathBuf::from("/run/quantisd.sock"));
        assert_eq!(config.server.max_connections, 4);
        assert_eq!(config.server.poll_timeout_ms, 2000);
        assert_eq!(config.server.idle_timeout, 0);
        assert_eq!(config.entropy.device, PathBuf::from("/dev/hwrng"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            socket = "/run/from-file"
            max_connections = 4
            "#,
        )
        .unwrap();

        let args = cli(&["-s", "/tmp/from-cli", "--idle-timeout", "0"]);
        let config = Config::merge(args, toml_config).unwrap();
        assert_eq!(config.socket, PathBuf::from("/tmp/from-cli"));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Config::merge(cli(&["-m", "0"]), TomlConfig::default());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
