//! Configuration module for the LG load generator.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::payload::DEFAULT_PAGE_SIZE;
use crate::session::{
    Endpoint, SessionOptions, StreamLimits, DEFAULT_MAX_STREAMS, DEFAULT_MAX_STREAM_LENGTH,
};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the load generator
#[derive(Parser, Debug)]
#[command(name = "lg-loadgen")]
#[command(author = "lg-loadgen authors")]
#[command(version = "0.1.0")]
#[command(about = "Randomized stream load against an LG server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// LG host to connect to
    #[arg(long)]
    pub host: Option<String>,

    /// LG port to connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of concurrent worker sessions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Spacing between the stream id prefixes of consecutive workers
    #[arg(long)]
    pub id_stride: Option<u64>,

    /// Seed for reproducible stream plans and payloads
    #[arg(long)]
    pub seed: Option<u64>,

    /// Give up waiting for a hangup acknowledgment after this many milliseconds
    #[arg(long)]
    pub ack_timeout_ms: Option<u64>,

    /// Do not send SHUTDOWN after the workers finish
    #[arg(long)]
    pub no_shutdown: bool,

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
    pub load: LoadConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target server
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Load shape
#[derive(Debug, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_id_stride")]
    pub id_stride: u64,
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    #[serde(default = "default_max_stream_length")]
    pub max_stream_length: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub seed: Option<u64>,
    /// Send SHUTDOWN once every worker has finished
    #[serde(default = "default_shutdown")]
    pub shutdown: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            id_stride: default_id_stride(),
            max_streams: default_max_streams(),
            max_stream_length: default_max_stream_length(),
            page_size: default_page_size(),
            seed: None,
            shutdown: default_shutdown(),
        }
    }
}

/// Per-session settings
#[derive(Debug, Deserialize, Default)]
pub struct SessionConfig {
    /// Hangup acknowledgment timeout in milliseconds (unset = wait forever)
    pub ack_timeout_ms: Option<u64>,
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
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    12777
}

fn default_workers() -> usize {
    5
}

fn default_id_stride() -> u64 {
    10_000
}

fn default_max_streams() -> usize {
    DEFAULT_MAX_STREAMS
}

fn default_max_stream_length() -> u64 {
    DEFAULT_MAX_STREAM_LENGTH
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_shutdown() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub workers: usize,
    pub id_stride: u64,
    pub limits: StreamLimits,
    pub page_size: usize,
    pub seed: Option<u64>,
    pub shutdown: bool,
    pub ack_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: Endpoint::default(),
            workers: default_workers(),
            id_stride: default_id_stride(),
            limits: StreamLimits::default(),
            page_size: default_page_size(),
            seed: None,
            shutdown: default_shutdown(),
            ack_timeout: None,
            log_level: default_log_level(),
        }
    }
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

        Config::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            endpoint: Endpoint {
                host: cli.host.unwrap_or(toml_config.server.host),
                port: cli.port.unwrap_or(toml_config.server.port),
            },
            workers: cli.workers.unwrap_or(toml_config.load.workers),
            id_stride: cli.id_stride.unwrap_or(toml_config.load.id_stride),
            limits: StreamLimits {
                max_streams: toml_config.load.max_streams,
                max_stream_length: toml_config.load.max_stream_length,
            },
            page_size: toml_config.load.page_size,
            seed: cli.seed.or(toml_config.load.seed),
            shutdown: !cli.no_shutdown && toml_config.load.shutdown,
            ack_timeout: cli
                .ack_timeout_ms
                .or(toml_config.session.ack_timeout_ms)
                .map(Duration::from_millis),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Options handed to every session.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            page_size: self.page_size,
            ack_timeout: self.ack_timeout,
        }
    }

    /// Stream id prefix for worker `index`.
    pub fn id_prefix(&self, index: usize) -> u64 {
        index as u64 * self.id_stride
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.limits.max_streams == 0 {
            return Err(ConfigError::Invalid(
                "max_streams must be at least 1".into(),
            ));
        }
        if self.limits.max_stream_length == 0 {
            return Err(ConfigError::Invalid(
                "max_stream_length must be at least 1".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.id_stride < self.limits.max_streams as u64 {
            return Err(ConfigError::Invalid(format!(
                "id_stride {} is smaller than max_streams {}; stream ids would overlap",
                self.id_stride, self.limits.max_streams
            )));
        }

        // The last worker's highest stream id must fit in 64 bits.
        let last_id = (self.workers as u64 - 1)
            .checked_mul(self.id_stride)
            .and_then(|prefix| prefix.checked_add(self.limits.max_streams as u64 - 1));
        if last_id.is_none() {
            return Err(ConfigError::Invalid(
                "workers * id_stride overflows the 64-bit stream id space".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
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
