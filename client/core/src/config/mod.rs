//! TOML Configuration File Support
//!
//! Centralized configuration loading for the client, supporting a TOML file
//! at `~/.config/kb-chat/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000/api"
//! connect_timeout_ms = 5000
//! request_timeout_ms = 30000
//!
//! [stream]
//! idle_timeout_secs = 0   # 0 = wait forever
//! event_buffer = 100
//!
//! [conversation]
//! history_limit = 0       # 0 = send every prior turn
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DEFAULT_BASE_URL;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// API base URL
    pub base_url: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Timeout for non-streaming requests in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Fail a stream after this many silent seconds (0 = never)
    pub idle_timeout_secs: Option<u64>,

    /// Capacity of the pump-to-store event channel
    pub event_buffer: Option<usize>,
}

/// Conversation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// Maximum prior turns sent as history (0 = unlimited)
    pub history_limit: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Stream configuration section
    pub stream: StreamToml,

    /// Conversation configuration section
    pub conversation: ConversationToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective client configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API base URL
    pub base_url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Timeout for non-streaming requests
    pub request_timeout: Duration,

    /// Silence after which a stream is failed (`None` = wait forever)
    pub idle_timeout: Option<Duration>,

    /// Capacity of the pump-to-store event channel
    pub event_buffer: usize,

    /// Maximum prior turns sent as history (0 = unlimited)
    pub history_limit: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            idle_timeout: None,
            event_buffer: 100,
            history_limit: 0,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the client unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::ValidationError(format!("base_url {:?}: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be http or https, got {:?}",
                url.scheme()
            )));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// API base URL
    pub base_url: Option<String>,
    /// Idle timeout in seconds (0 = never)
    pub idle_timeout_secs: Option<u64>,
    /// History limit
    pub history_limit: Option<usize>,
}

impl ConfigOverrides {
    /// Apply the overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(ref url) = self.base_url {
            config.base_url = url.clone();
            config.source = ConfigSource::Cli;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout = idle_timeout_from_secs(secs);
            config.source = ConfigSource::Cli;
        }
        if let Some(limit) = self.history_limit {
            config.history_limit = limit;
            config.source = ConfigSource::Cli;
        }
    }
}

fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/kb-chat/client.toml` or
/// `~/.config/kb-chat/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("kb-chat").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    // Start with defaults
    let mut config = ClientConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    // Backend settings
    if let Some(ref url) = toml.backend.base_url {
        config.base_url = url.clone();
    }
    if let Some(ms) = toml.backend.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.backend.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }

    // Stream settings
    if let Some(secs) = toml.stream.idle_timeout_secs {
        config.idle_timeout = idle_timeout_from_secs(secs);
    }
    if let Some(capacity) = toml.stream.event_buffer {
        config.event_buffer = capacity;
    }

    // Conversation settings
    if let Some(limit) = toml.conversation.history_limit {
        config.history_limit = limit;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("KB_CHAT_API_URL") {
        config.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = var("KB_CHAT_CONNECT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.connect_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = var("KB_CHAT_REQUEST_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.request_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = var("KB_CHAT_IDLE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.idle_timeout = idle_timeout_from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = var("KB_CHAT_EVENT_BUFFER").and_then(|v| v.parse::<usize>().ok()) {
        config.event_buffer = n;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = var("KB_CHAT_HISTORY_LIMIT").and_then(|v| v.parse::<usize>().ok()) {
        config.history_limit = n;
        config.source = ConfigSource::Env;
    }
}
