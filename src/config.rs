//! Configuration for the share server and the throughput tool.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port for the HTTP share server
pub const DEFAULT_SHARE_PORT: u16 = 8000;

/// Default port for the throughput tool
pub const DEFAULT_SPEED_PORT: u16 = 12345;

/// Default number of concurrently served HTTP connections
pub const DEFAULT_WORKERS: usize = 10;

/// Default streaming chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Default time a client gets to send its request head
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default throughput payload size
pub const DEFAULT_PAYLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Command-line arguments for the share server
#[derive(Parser, Debug)]
#[command(name = "lanshare")]
#[command(version)]
#[command(about = "Share a directory over HTTP", long_about = None)]
pub struct ShareArgs {
    /// Directory to share (default: current directory)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Port to use (default: 8000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (default: 0.0.0.0)
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Maximum number of connections served at once
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Streaming chunk size in bytes
    #[arg(long, value_parser = parse_size_usize)]
    pub chunk_size: Option<usize>,

    /// Seconds a client may take to send its request (default: 10)
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the throughput tool
#[derive(Parser, Debug)]
#[command(name = "lanspeed")]
#[command(version)]
#[command(about = "LAN speed test", long_about = None)]
pub struct SpeedArgs {
    /// Run as server
    #[arg(long, conflicts_with = "client")]
    pub server: bool,

    /// Run as client and connect to server IP
    #[arg(long, value_name = "SERVER_IP")]
    pub client: Option<String>,

    /// Port to use (default: 12345)
    #[arg(long)]
    pub port: Option<u16>,

    /// Payload size sent per test, e.g. 100M (server only)
    #[arg(long, value_parser = parse_size)]
    pub size: Option<u64>,

    /// Number of tests the server runs at once (1 = one client at a time)
    #[arg(long)]
    pub sessions: Option<usize>,

    /// Streaming chunk size in bytes
    #[arg(long, value_parser = parse_size_usize)]
    pub chunk_size: Option<usize>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub share: ShareSection,
    #[serde(default)]
    pub speed: SpeedSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener settings shared by both tools
#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    /// Address to bind to
    pub bind: Option<IpAddr>,
    /// Maximum number of connections served at once
    pub workers: Option<usize>,
}

/// Share server settings
#[derive(Debug, Deserialize, Default)]
pub struct ShareSection {
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
    /// Seconds a client may take to send its request
    pub request_timeout: Option<u64>,
}

/// Throughput tool settings
#[derive(Debug, Deserialize, Default)]
pub struct SpeedSection {
    pub port: Option<u16>,
    pub payload_size: Option<u64>,
    pub sessions: Option<usize>,
}

/// Streaming settings
#[derive(Debug, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Read and parse the TOML file if one was given.
fn load_toml(path: Option<&Path>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

fn positive(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(name, "must be greater than zero"));
    }
    Ok(value)
}

fn positive_secs(name: &'static str, secs: u64) -> Result<u64, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue(name, "must be at least one second"));
    }
    Ok(secs)
}

/// Resolve the shared directory to an absolute, canonical path.
///
/// Fails when the path does not exist or is not a directory.
pub fn validate_directory(path: &Path) -> Result<PathBuf, ConfigError> {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match absolute.canonicalize() {
        Ok(canonical) if canonical.is_dir() => Ok(canonical),
        _ => Err(ConfigError::NotADirectory(absolute)),
    }
}

/// Resolved configuration for the share server
#[derive(Debug, Clone)]
pub struct ShareConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Canonical path of the shared root
    pub directory: PathBuf,
    pub workers: usize,
    pub chunk_size: usize,
    /// Idle connections are closed after this long without a request
    pub request_timeout: Duration,
    pub log_level: String,
}

impl ShareConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ShareArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at.
    pub fn from_args(cli: ShareArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(cli.config.as_deref())?;
        Self::merge(cli, toml_config)
    }

    fn merge(cli: ShareArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let directory = match cli.directory.or(toml_config.share.directory) {
            Some(dir) => dir,
            None => std::env::current_dir()
                .map_err(|_| ConfigError::NotADirectory(PathBuf::from(".")))?,
        };

        Ok(ShareConfig {
            bind: cli
                .bind
                .or(toml_config.server.bind)
                .unwrap_or_else(default_bind),
            port: cli
                .port
                .or(toml_config.share.port)
                .unwrap_or(DEFAULT_SHARE_PORT),
            directory: validate_directory(&directory)?,
            workers: positive(
                "workers",
                cli.workers
                    .or(toml_config.server.workers)
                    .unwrap_or(DEFAULT_WORKERS),
            )?,
            chunk_size: positive(
                "chunk_size",
                cli.chunk_size.unwrap_or(toml_config.transfer.chunk_size),
            )?,
            request_timeout: match cli.request_timeout.or(toml_config.share.request_timeout) {
                Some(secs) => Duration::from_secs(positive_secs("request_timeout", secs)?),
                None => DEFAULT_REQUEST_TIMEOUT,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Which side of a throughput test this process plays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client { host: String },
}

/// Resolved configuration for the throughput tool
#[derive(Debug, Clone)]
pub struct SpeedConfig {
    pub role: Role,
    pub bind: IpAddr,
    pub port: u16,
    pub payload_size: u64,
    /// Tests run concurrently by the server; 1 serializes clients
    pub sessions: usize,
    pub chunk_size: usize,
    pub log_level: String,
}

impl SpeedConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(SpeedArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at.
    pub fn from_args(cli: SpeedArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(cli.config.as_deref())?;
        Self::merge(cli, toml_config)
    }

    fn merge(cli: SpeedArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let role = match (cli.server, cli.client) {
            (true, None) => Role::Server,
            (false, Some(host)) => Role::Client { host },
            _ => return Err(ConfigError::MissingRole),
        };

        Ok(SpeedConfig {
            role,
            bind: toml_config.server.bind.unwrap_or_else(default_bind),
            port: cli
                .port
                .or(toml_config.speed.port)
                .unwrap_or(DEFAULT_SPEED_PORT),
            payload_size: cli
                .size
                .or(toml_config.speed.payload_size)
                .unwrap_or(DEFAULT_PAYLOAD_SIZE),
            sessions: positive(
                "sessions",
                cli.sessions.or(toml_config.speed.sessions).unwrap_or(1),
            )?,
            chunk_size: positive(
                "chunk_size",
                cli.chunk_size.unwrap_or(toml_config.transfer.chunk_size),
            )?,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Socket address the server binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Parse a byte size with an optional binary suffix (K, M, G).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s);
    let (num, multiplier) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024u64)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024u64)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024u64)
    } else {
        (s, 1u64)
    };

    num.trim()
        .parse::<u64>()
        .map_err(|e| e.to_string())?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

fn parse_size_usize(s: &str) -> Result<usize, String> {
    let size = parse_size(s)?;
    usize::try_from(size).map_err(|e| e.to_string())
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    NotADirectory(PathBuf),
    MissingRole,
    InvalidValue(&'static str, &'static str),
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
            ConfigError::NotADirectory(path) => {
                write!(f, "{} is not a valid directory", path.display())
            }
            ConfigError::MissingRole => write!(f, "Please specify either --server or --client"),
            ConfigError::InvalidValue(name, reason) => write!(f, "Invalid {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
