//! Configuration system for Crawlbridge.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Main configuration struct for Crawlbridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint settings
    pub endpoint: EndpointConfig,
    /// Per-call defaults
    pub calls: CallsConfig,
    /// Reconnection policy
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            calls: CallsConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// WebSocket URL of the remote extraction service
    pub url: String,
    /// Optional alternate endpoint used only for tool discovery
    pub discovery_url: Option<String>,
    /// Socket + handshake timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:11235/mcp/ws".to_string(),
            discovery_url: None,
            connect_timeout_secs: 15,
        }
    }
}

impl EndpointConfig {
    /// Socket + handshake timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    /// Default timeout for a tool call, in seconds
    pub default_timeout_secs: u64,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
        }
    }
}

impl CallsConfig {
    /// Default call timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum reconnect attempts; `None` retries forever at the capped interval
    pub max_attempts: Option<u32>,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Upper bound on the backoff interval in milliseconds
    pub backoff_cap_ms: u64,
    /// Jitter factor in [0.0, 1.0] applied to each delay
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            backoff_cap_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Initial backoff delay as a `Duration`.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff cap as a `Duration`.
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "reconnect.jitter")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();
        let project_config = PathBuf::from(".crawlbridge/config.toml");

        Figment::new()
            // Default values
            .merge(figment::providers::Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Project config
            .merge(Toml::file(&project_config))
            // Environment variables
            .merge(Env::prefixed("CRAWLBRIDGE_").split("_"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.endpoint.url.is_empty() {
            result.add_error("endpoint.url", "Endpoint URL cannot be empty");
        } else if !self.endpoint.url.starts_with("ws://") && !self.endpoint.url.starts_with("wss://")
        {
            result.add_error("endpoint.url", "Endpoint URL must use the ws:// or wss:// scheme");
        }

        if let Some(discovery) = &self.endpoint.discovery_url {
            if !discovery.starts_with("ws://") && !discovery.starts_with("wss://") {
                result.add_error(
                    "endpoint.discovery_url",
                    "Discovery URL must use the ws:// or wss:// scheme",
                );
            }
        }

        if self.endpoint.connect_timeout_secs == 0 {
            result.add_error("endpoint.connect_timeout_secs", "Connect timeout must be non-zero");
        }

        if self.calls.default_timeout_secs == 0 {
            result.add_error("calls.default_timeout_secs", "Default call timeout must be non-zero");
        }

        if self.calls.default_timeout_secs > 600 {
            result.add_warning(
                "calls.default_timeout_secs",
                "Default call timeout is very high (> 10 minutes)",
            );
        }

        if self.reconnect.initial_backoff_ms == 0 {
            result.add_error("reconnect.initial_backoff_ms", "Initial backoff must be non-zero");
        }

        if self.reconnect.backoff_cap_ms < self.reconnect.initial_backoff_ms {
            result.add_error(
                "reconnect.backoff_cap_ms",
                "Backoff cap must be at least the initial backoff",
            );
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            result.add_error(
                "reconnect.backoff_multiplier",
                "Backoff multiplier must be at least 1.0",
            );
        }

        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            result.add_error("reconnect.jitter", "Jitter must be within [0.0, 1.0]");
        }

        if self.reconnect.max_attempts == Some(0) {
            result.add_error("reconnect.max_attempts", "max_attempts must be non-zero when set");
        }

        result
    }

    /// Path of the user configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("crawlbridge"))
            .unwrap_or_else(|| PathBuf::from("~/.config/crawlbridge"))
    }
}
