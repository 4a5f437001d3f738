//! # Configuration Management
//!
//! Centralized configuration for the broker server, its clients, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`PRIVILEGE_BROKER_*`)
//!
//! ## Security Considerations
//! - The default frame limit (1 MiB) bounds what an unprivileged caller can make
//!   the broker allocate for one request
//! - `allow_authenticated_users = false` narrows the channel to its owner

use crate::error::{ProtocolError, Result};
use crate::transport::access::AccessPolicy;
use crate::transport::ChannelName;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Well-known channel name shared by broker and clients
pub const DEFAULT_CHANNEL_NAME: &str = "privilege-broker";

/// Max allowed frame payload size (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Hard ceiling for the configurable frame size
pub const MAX_FRAME_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Name given to the dedicated accept thread
pub const DEFAULT_THREAD_NAME: &str = "broker-accept";

/// Main broker configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BrokerConfig {
    /// Channel identity and framing limits, shared by both sides
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("PRIVILEGE_BROKER_CHANNEL_NAME") {
            config.channel.name = name;
        }

        if let Ok(size) = std::env::var("PRIVILEGE_BROKER_MAX_FRAME_SIZE") {
            config.channel.max_frame_size = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid PRIVILEGE_BROKER_MAX_FRAME_SIZE '{size}': {e}"
                ))
            })?;
        }

        if let Ok(allow) = std::env::var("PRIVILEGE_BROKER_ALLOW_AUTHENTICATED_USERS") {
            config.server.allow_authenticated_users = allow.parse::<bool>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid PRIVILEGE_BROKER_ALLOW_AUTHENTICATED_USERS '{allow}': {e}"
                ))
            })?;
        }

        if let Ok(interval) = std::env::var("PRIVILEGE_BROKER_BUSY_RETRY_INTERVAL_MS") {
            let millis = interval.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid PRIVILEGE_BROKER_BUSY_RETRY_INTERVAL_MS '{interval}': {e}"
                ))
            })?;
            config.client.busy_retry_interval = Duration::from_millis(millis);
        }

        if let Ok(level) = std::env::var("PRIVILEGE_BROKER_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid PRIVILEGE_BROKER_LOG_LEVEL '{level}'"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.channel.validate());
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Resolved channel identity
    pub fn channel_name(&self) -> ChannelName {
        ChannelName::new(&self.channel.name)
    }

    /// Access policy the server applies to every endpoint instance
    pub fn access_policy(&self) -> AccessPolicy {
        if self.server.allow_authenticated_users {
            AccessPolicy::broker_default()
        } else {
            AccessPolicy::owner_only()
        }
    }
}

/// Channel identity and framing limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel name; a bare name or, on Unix, an absolute socket path.
    /// Bare names resolve into the world-writable temp directory on Unix, so
    /// privileged deployments should set an absolute path.
    pub name: String,

    /// Maximum frame payload in bytes
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::from(DEFAULT_CHANNEL_NAME),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Channel name cannot be empty".to_string());
        } else if !Path::new(&self.name).is_absolute()
            && self.name.chars().any(|c| c == '/' || c == '\\')
        {
            errors.push(format!(
                "Invalid channel name: '{}' (use a bare name or an absolute path)",
                self.name
            ));
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: {} bytes)",
                self.max_frame_size, MAX_FRAME_SIZE_LIMIT
            ));
        }

        errors
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Grant connect/read-write to any authenticated local principal
    pub allow_authenticated_users: bool,

    /// Name of the dedicated accept thread
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_authenticated_users: true,
            thread_name: String::from(DEFAULT_THREAD_NAME),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.thread_name.is_empty() {
            errors.push("Server thread name cannot be empty".to_string());
        } else if self.thread_name.contains('\0') {
            errors.push("Server thread name cannot contain NUL bytes".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long to wait before retrying a connect to an endpoint that is busy
    /// serving another caller
    #[serde(with = "duration_serde")]
    pub busy_retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            busy_retry_interval: Duration::from_millis(50),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.busy_retry_interval.as_millis() < 1 {
            errors.push("Busy retry interval too short (minimum: 1ms)".to_string());
        } else if self.busy_retry_interval.as_secs() > 10 {
            errors.push("Busy retry interval too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("privilege-broker"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.to_string().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
