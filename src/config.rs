//! # Configuration Management
//!
//! Centralized configuration for the RPC runtime.
//!
//! Structured configuration for servers, clients, discovery, and logging.
//! Builder-style assembly lives with the caller; this module only defines the
//! plain structured parameters the runtime consumes.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`

use crate::error::{RpcError, Result};
use crate::service::reconnect::ReconnectOptions;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default UDP multicast group for discovery.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

/// Default UDP port for discovery.
pub const DISCOVERY_PORT: u16 = 37020;

/// Main configuration structure for all runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RpcConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RpcConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RpcError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RpcError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("RPC_CORE_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(timeout) = std::env::var("RPC_CORE_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
                config.client.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("RPC_CORE_CALL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.call_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(token) = std::env::var("RPC_CORE_ACCESS_TOKEN") {
            config.client.token = Some(token);
        }

        if let Ok(port) = std::env::var("RPC_CORE_DISCOVERY_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.discovery.port = val;
            }
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

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RpcError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| RpcError::Config(format!("Failed to write config file: {e}")))?;
        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.discovery.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RpcError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Lifetime policy for a connection's symmetric key material.
///
/// Only per-connection keys are implemented; the policy is a named knob so
/// the decision stays visible and rotation variants can be added without
/// touching the handshake flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyLifetime {
    /// One fresh key + iv per connection, never rotated.
    #[default]
    Connection,
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Deadline for each handshake step on a new connection
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Per-connection outbound queue depth (responses + callbacks).
    /// Callbacks that find the queue full are dropped for that connection.
    pub callback_queue_depth: usize,

    /// Symmetric key lifetime policy
    #[serde(default)]
    pub key_lifetime: KeyLifetime,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            callback_queue_depth: 256,
            key_lifetime: KeyLifetime::Connection,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 120 {
            errors.push("Handshake timeout too long (maximum: 120s)".to_string());
        }

        if self.callback_queue_depth == 0 {
            errors.push("Callback queue depth must be greater than 0".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Deadline for the complete handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for awaiting a call's response
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,

    /// Access token sent during authorization; absent means "no auth"
    pub token: Option<String>,

    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            call_timeout: timeout::CALL_TIMEOUT,
            token: None,
            reconnect: ReconnectOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }
        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }
        if self.call_timeout.as_millis() < 10 {
            errors.push("Call timeout too short (minimum: 10ms)".to_string());
        }

        errors.extend(self.reconnect.validate());
        errors
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Whether discovery is enabled at all
    pub enabled: bool,

    /// UDP multicast group to join
    pub group: Ipv4Addr,

    /// UDP port for discovery datagrams
    pub port: u16,

    /// Interval between heartbeats in continuous mode
    #[serde(with = "duration_serde")]
    pub heartbeat_period: Duration,

    /// Continuous mode re-broadcasts heartbeats until stopped;
    /// otherwise only Hello/Goodbye mark the transition boundaries
    pub continuous: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: DISCOVERY_GROUP,
            port: DISCOVERY_PORT,
            heartbeat_period: Duration::from_secs(5),
            continuous: true,
        }
    }
}

impl DiscoveryConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.group.is_multicast() {
            errors.push(format!(
                "Discovery group {} is not a multicast address",
                self.group
            ));
        }
        if self.port == 0 {
            errors.push("Discovery port cannot be 0".to_string());
        }
        if self.continuous && self.heartbeat_period.as_millis() < 100 {
            errors.push("Heartbeat period too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("rpc-core"),
            log_level: Level::INFO,
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

        errors
    }
}

/// Helper module for Duration serialization/deserialization
pub(crate) mod duration_serde {
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        assert!(RpcConfig::default().validate().is_empty());
    }

    #[test]
    fn toml_roundtrip() {
        let config = RpcConfig::default_with_overrides(|c| {
            c.server.max_connections = 12;
            c.client.token = Some("secret".into());
            c.discovery.enabled = true;
        });
        let toml = toml::to_string_pretty(&config).unwrap();
        let back = RpcConfig::from_toml(&toml).unwrap();
        assert_eq!(back.server.max_connections, 12);
        assert_eq!(back.client.token.as_deref(), Some("secret"));
        assert!(back.discovery.enabled);
        assert_eq!(back.discovery.group, DISCOVERY_GROUP);
    }

    #[test]
    fn bad_values_are_reported() {
        let config = RpcConfig::default_with_overrides(|c| {
            c.server.max_connections = 0;
            c.server.callback_queue_depth = 0;
            c.discovery.group = Ipv4Addr::new(10, 0, 0, 1);
            c.client.reconnect.backoff_multiplier = 0.1;
        });
        let errors = config.validate();
        assert_eq!(errors.len(), 4);
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            RpcConfig::from_toml("[server\nmax_connections = 1"),
            Err(RpcError::Config(_))
        ));
    }
}
