//! Service configuration.
//!
//! Loading happens in three tiers, later tiers winning:
//! 1. JSON file (`--config`), or built-in defaults without one
//! 2. Environment variables
//! 3. CLI arguments
//!
//! ```json
//! {
//!   "listener": { "host": "0.0.0.0", "port": 8787, "max_connections": 1024 },
//!   "session":  { "buffer_capacity": 4096, "idle_timeout_secs": 30, "auth_timeout_secs": 30 },
//!   "stations": { "registry_file": "/etc/envtrack/stations.json" },
//!   "logging":  { "level": "info", "format": "compact" },
//!   "sink":     { "channel_capacity": 256 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acceptor::DEFAULT_MAX_CONNECTIONS;
use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::{IngestError, Result};
use crate::handler::DEFAULT_SINK_CAPACITY;
use crate::logging::LogConfig;
use crate::protocol::max_frame_len_for;
use crate::session::{SessionConfig, DEFAULT_PAYLOAD_TRAILER_LEN};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8787;

/// Shortest frame that can carry a command: `FINI\n` plus one byte.
const MIN_FRAME_LENGTH: usize = 6;

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub listener: ListenerConfig,
    pub session: SessionSettings,
    pub stations: StationsConfig,
    pub logging: LogConfig,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub buffer_capacity: usize,
    pub idle_timeout_secs: u64,
    /// Deadline from accept for a successful `HELO`.
    pub auth_timeout_secs: u64,
    /// Derived from the buffer capacity when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_length: Option<usize>,
    pub payload_trailer_len: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            idle_timeout_secs: 30,
            auth_timeout_secs: 30,
            max_frame_length: None,
            payload_trailer_len: DEFAULT_PAYLOAD_TRAILER_LEN,
        }
    }
}

impl SessionSettings {
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
            .unwrap_or_else(|| max_frame_len_for(self.buffer_capacity))
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            buffer_capacity: self.buffer_capacity,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            max_frame_len: self.max_frame_length(),
            payload_trailer_len: self.payload_trailer_len,
        }
    }
}

/// Where registered stations come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationsConfig {
    pub guids: Vec<String>,
    /// Takes precedence over `guids` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub channel_capacity: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

/// Explicit overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub stations: Vec<String>,
    pub stations_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Load the configuration file, or defaults when no path is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON.
pub fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    let Some(path) = path else {
        return Ok(IngestConfig::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        IngestError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;

    Ok(serde_json::from_str(&content)?)
}

impl IngestConfig {
    /// Apply `ENVTRACK_*` overrides from the process environment.
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `ENVTRACK_*` overrides read through `lookup`.
    ///
    /// Supported variables:
    /// - `ENVTRACK_TCP_HOST` -> `listener.host`
    /// - `ENVTRACK_TCP_PORT` -> `listener.port`
    /// - `ENVTRACK_MAX_CONNECTIONS` -> `listener.max_connections`
    /// - `ENVTRACK_BUFFER_CAPACITY` -> `session.buffer_capacity`
    /// - `ENVTRACK_IDLE_TIMEOUT_SECS` -> `session.idle_timeout_secs`
    /// - `ENVTRACK_AUTH_TIMEOUT_SECS` -> `session.auth_timeout_secs`
    /// - `ENVTRACK_STATIONS_FILE` -> `stations.registry_file`
    /// - `ENVTRACK_LOG_LEVEL` -> `logging.level`
    ///
    /// # Errors
    ///
    /// Returns a config error naming the variable if a value does not parse.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ENVTRACK_TCP_HOST") {
            self.listener.host = value;
        }
        if let Some(value) = lookup("ENVTRACK_TCP_PORT") {
            self.listener.port = parse_env("ENVTRACK_TCP_PORT", &value)?;
        }
        if let Some(value) = lookup("ENVTRACK_MAX_CONNECTIONS") {
            self.listener.max_connections = parse_env("ENVTRACK_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("ENVTRACK_BUFFER_CAPACITY") {
            self.session.buffer_capacity = parse_env("ENVTRACK_BUFFER_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("ENVTRACK_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs = parse_env("ENVTRACK_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("ENVTRACK_AUTH_TIMEOUT_SECS") {
            self.session.auth_timeout_secs = parse_env("ENVTRACK_AUTH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("ENVTRACK_STATIONS_FILE") {
            self.stations.registry_file = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("ENVTRACK_LOG_LEVEL") {
            self.logging.level = value.parse()?;
        }
        Ok(())
    }

    /// Apply command-line overrides. CLI station GUIDs extend the list.
    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(host) = &cli.host {
            self.listener.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.listener.port = port;
        }
        self.stations.guids.extend(cli.stations.iter().cloned());
        if let Some(path) = &cli.stations_file {
            self.stations.registry_file = Some(path.clone());
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.parse()?;
        }
        Ok(())
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.listener.port == 0 {
            return Err(IngestError::Config("listener.port must not be 0".into()));
        }
        if self.listener.max_connections == 0 {
            return Err(IngestError::Config(
                "listener.max_connections must be at least 1".into(),
            ));
        }
        if self.session.buffer_capacity == 0 {
            return Err(IngestError::Config(
                "session.buffer_capacity must be at least 1".into(),
            ));
        }
        if self.session.idle_timeout_secs == 0 {
            return Err(IngestError::Config(
                "session.idle_timeout_secs must be at least 1".into(),
            ));
        }
        if self.session.auth_timeout_secs == 0 {
            return Err(IngestError::Config(
                "session.auth_timeout_secs must be at least 1".into(),
            ));
        }
        if self.session.max_frame_length() < MIN_FRAME_LENGTH {
            return Err(IngestError::Config(format!(
                "session.max_frame_length must be at least {}",
                MIN_FRAME_LENGTH
            )));
        }
        if self.sink.channel_capacity == 0 {
            return Err(IngestError::Config(
                "sink.channel_capacity must be at least 1".into(),
            ));
        }
        if self.stations.guids.is_empty() && self.stations.registry_file.is_none() {
            return Err(IngestError::Config(
                "no stations configured: set stations.guids or stations.registry_file".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{} has invalid value {:?}", key, value)))
}
