//! Configuration file handling
//!
//! Settings are layered: the TOML config file, then environment variables
//! (a `.env` file in the working directory is loaded first), then command
//! line flags. [`Config::resolve`] validates the result into [`RunSettings`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_output_dir};
use super::{Error, Result};
use crate::scenario::PlayerIdentity;
use crate::transport::{Endpoint, SessionOptions};

/// Environment variable names
pub const ENV_HOST: &str = "BEACON_HOST";
pub const ENV_PORT: &str = "BEACON_PORT";
pub const ENV_KEY: &str = "BEACON_KEY";
pub const ENV_PLAYER_UUID: &str = "BEACON_PLAYER_UUID";
pub const ENV_PLAYER_NAME: &str = "BEACON_PLAYER_NAME";
pub const ENV_OUTPUT_DIR: &str = "OUTPUT_DIR";

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Remote endpoint settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Player targeted by player-specific steps
    #[serde(default)]
    pub player: PlayerConfig,

    /// Artifact output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Log file settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote endpoint settings
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Host name or address of the Beacon server
    #[serde(default = "default_host")]
    pub host: String,

    /// Socket.IO port (required)
    pub port: Option<u16>,

    /// Shared key sent with every request (required)
    pub key: Option<String>,

    /// Extra connect attempts after the first one fails
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    /// Timeout for each connect attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            key: None,
            reconnection_attempts: default_reconnection_attempts(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_reconnection_attempts() -> u32 {
    3
}
fn default_connect_timeout() -> u64 {
    10_000
}

/// Player identity, either field may be set
#[derive(Debug, Deserialize, Default)]
pub struct PlayerConfig {
    pub uuid: Option<String>,
    pub name: Option<String>,
}

/// Artifact output settings
#[derive(Debug, Deserialize, Default)]
pub struct OutputConfig {
    /// Directory that receives artifacts (reset at the start of every run)
    pub dir: Option<PathBuf>,

    /// Write a `data: null` artifact with an `error` field for failed steps
    #[serde(default)]
    pub record_failures: bool,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// How long a correlated call waits for its acknowledgment
    #[serde(default = "default_ack")]
    pub ack_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ack_ms: default_ack(),
        }
    }
}

fn default_ack() -> u64 {
    10_000
}

/// Log file settings
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// Mirror logs into this file in addition to stderr
    pub file: Option<PathBuf>,
}

/// Command line overrides, applied last
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub key: Option<String>,
    pub player_uuid: Option<String>,
    pub player_name: Option<String>,
    pub output: Option<PathBuf>,
    pub record_failures: bool,
    pub log_file: Option<PathBuf>,
}

/// Validated settings for one run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub endpoint: Endpoint,
    pub key: String,
    pub player: PlayerIdentity,
    pub output_dir: PathBuf,
    pub record_failures: bool,
    pub ack_timeout: Duration,
    pub session: SessionOptions,
}

impl Config {
    /// Load configuration from `path`, or from the default config file
    ///
    /// An explicit path must exist. The default file is optional and
    /// missing means all defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply overrides from the process environment, loading `.env` first
    pub fn apply_process_env(&mut self) -> Result<()> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
        }
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(host) = get(ENV_HOST) {
            self.connection.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            self.connection.port = Some(parse_port(&port)?);
        }
        if let Some(key) = get(ENV_KEY) {
            self.connection.key = Some(key);
        }
        if let Some(uuid) = get(ENV_PLAYER_UUID) {
            self.player.uuid = Some(uuid);
        }
        if let Some(name) = get(ENV_PLAYER_NAME) {
            self.player.name = Some(name);
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            self.output.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.host.clone().and_then(non_empty) {
            self.connection.host = host;
        }
        if let Some(port) = overrides.port {
            self.connection.port = Some(port);
        }
        if let Some(key) = overrides.key.clone().and_then(non_empty) {
            self.connection.key = Some(key);
        }
        if let Some(uuid) = overrides.player_uuid.clone().and_then(non_empty) {
            self.player.uuid = Some(uuid);
        }
        if let Some(name) = overrides.player_name.clone().and_then(non_empty) {
            self.player.name = Some(name);
        }
        if let Some(dir) = &overrides.output {
            self.output.dir = Some(dir.clone());
        }
        if overrides.record_failures {
            self.output.record_failures = true;
        }
        if let Some(file) = &overrides.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// Validate and produce the settings for a run
    pub fn resolve(&self) -> Result<RunSettings> {
        let port = self
            .connection
            .port
            .ok_or_else(|| Error::missing_setting("connection.port", ENV_PORT))?;
        let key = self
            .connection
            .key
            .clone()
            .and_then(non_empty)
            .ok_or_else(|| Error::missing_setting("connection.key", ENV_KEY))?;

        if self.timeouts.ack_ms == 0 {
            return Err(Error::Config("timeouts.ack_ms must be greater than 0".to_string()));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "connection.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.connection.reconnection_attempts > MAX_RECONNECTION_ATTEMPTS {
            return Err(Error::Config(format!(
                "connection.reconnection_attempts must be at most {}",
                MAX_RECONNECTION_ATTEMPTS
            )));
        }

        Ok(RunSettings {
            endpoint: Endpoint::new(self.connection.host.clone(), port),
            key,
            player: PlayerIdentity::new(
                self.player.uuid.clone().and_then(non_empty),
                self.player.name.clone().and_then(non_empty),
            ),
            output_dir: self.output.dir.clone().unwrap_or_else(default_output_dir),
            record_failures: self.output.record_failures,
            ack_timeout: Duration::from_millis(self.timeouts.ack_ms),
            session: SessionOptions {
                reconnection_attempts: self.connection.reconnection_attempts,
                connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            },
        })
    }
}

/// Upper bound on `connection.reconnection_attempts`
pub const MAX_RECONNECTION_ATTEMPTS: u32 = 100;

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid port '{}' in {}", value, ENV_PORT)))
}
