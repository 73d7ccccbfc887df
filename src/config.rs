//! # Configuration Management
//!
//! Centralized configuration for the handshake server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides prefixed `TS_HANDSHAKE_`
//!
//! ## Security Considerations
//! - The puzzle level bounds how much work a flood costs each side
//! - The session cap and idle timeout bound memory held for half-open handshakes

use crate::crypto::puzzle::DEFAULT_LEVEL;
use crate::error::{ProtocolError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Well-known port of the voice server.
pub const DEFAULT_PORT: u16 = 9987;

/// Puzzle levels above this make verification itself a denial-of-service vector.
pub const MAX_PUZZLE_LEVEL: u32 = 1_000_000;

const ENV_PREFIX: &str = "TS_HANDSHAKE_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Socket and session table settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Handshake parameters
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

impl NetworkConfig {
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

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TS_HANDSHAKE_*` overrides on top of the current values.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` when a set variable does not parse.
    pub fn apply_env(&mut self) -> Result<()> {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
            raw.parse::<T>().map_err(|_| {
                ProtocolError::ConfigError(format!("{ENV_PREFIX}{name} has invalid value '{raw}'"))
            })
        }

        if let Some(addr) = env_var("SERVER_ADDRESS") {
            self.server.address = addr;
        }
        if let Some(raw) = env_var("BACKPRESSURE_LIMIT") {
            self.server.backpressure_limit = parse("BACKPRESSURE_LIMIT", &raw)?;
        }
        if let Some(raw) = env_var("SESSION_IDLE_TIMEOUT_MS") {
            self.server.session_idle_timeout =
                Duration::from_millis(parse("SESSION_IDLE_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = env_var("MAX_SESSIONS") {
            self.server.max_sessions = parse("MAX_SESSIONS", &raw)?;
        }
        if let Some(raw) = env_var("PUZZLE_LEVEL") {
            self.handshake.puzzle_level = parse("PUZZLE_LEVEL", &raw)?;
        }
        if let Some(key) = env_var("IDENTITY_KEY") {
            self.handshake.identity_key = Some(key);
        }
        if let Some(issuer) = env_var("LICENSE_ISSUER") {
            self.handshake.license_issuer = issuer;
        }
        if let Some(raw) = env_var("LOG_LEVEL") {
            self.logging.log_level = parse("LOG_LEVEL", &raw)?;
        }
        Ok(())
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
        errors.extend(self.server.validate());
        errors.extend(self.handshake.validate());
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
}

/// Socket and session table configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP listen address (e.g., "0.0.0.0:9987")
    pub address: String,

    /// Datagrams queued per peer before new ones are dropped
    pub backpressure_limit: usize,

    /// Sessions with no datagram for this long are evicted
    #[serde(with = "duration_serde")]
    pub session_idle_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent handshakes
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            backpressure_limit: 32,
            session_idle_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            max_sessions: 10_000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9987')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.session_idle_timeout.as_millis() < 100 {
            errors.push("Session idle timeout too short (minimum: 100ms)".to_string());
        } else if self.session_idle_timeout.as_secs() > 600 {
            errors.push("Session idle timeout too long (maximum: 600s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 1_000_000 {
            errors.push(format!(
                "Max sessions very high: {} (ensure system resources can support this)",
                self.max_sessions
            ));
        }

        errors
    }
}

/// Handshake parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Squarings the client must perform for the Init3 puzzle
    pub puzzle_level: u32,

    /// Base64 of the 32-byte P-256 signing scalar; a fresh key is drawn when absent
    pub identity_key: Option<String>,

    /// Issuer written into the license's server block
    pub license_issuer: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            puzzle_level: DEFAULT_LEVEL,
            identity_key: None,
            license_issuer: String::from(crate::crypto::license::DEFAULT_ISSUER),
        }
    }
}

impl HandshakeConfig {
    /// Decode the configured identity key.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` if the key is not base64 of exactly 32 bytes.
    pub fn identity_key_bytes(&self) -> Result<Option<[u8; 32]>> {
        let Some(encoded) = self.identity_key.as_deref() else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ProtocolError::ConfigError(format!("identity_key is not base64: {e}")))?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            ProtocolError::ConfigError(format!(
                "identity_key must decode to 32 bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Some(bytes))
    }

    /// Validate handshake configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.puzzle_level > MAX_PUZZLE_LEVEL {
            errors.push(format!(
                "Puzzle level too high: {} (maximum: {MAX_PUZZLE_LEVEL})",
                self.puzzle_level
            ));
        }

        if let Err(e) = self.identity_key_bytes() {
            errors.push(e.to_string());
        }

        if self.license_issuer.is_empty() {
            errors.push("License issuer cannot be empty".to_string());
        } else if self.license_issuer.contains('\0') {
            errors.push("License issuer cannot contain NUL bytes".to_string());
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

    /// Log level used when `RUST_LOG` is not set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to file instead of stdout
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("tsproto-handshake"),
            log_level: Level::INFO,
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
