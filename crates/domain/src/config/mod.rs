mod channel;
mod observability;
mod server;

pub use channel::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token.
    /// If the env var is unset, the channel endpoints are open (dev mode).
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

fn d_admin_token_env() -> String {
    "FL_ADMIN_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        let ch = &self.channel;
        if ch.retry_limit == 0 {
            errors.push(ConfigError::error(
                "channel.retry_limit",
                "retry_limit must be at least 1",
            ));
        }
        if ch.base_delay_ms == 0 {
            errors.push(ConfigError::error(
                "channel.base_delay_ms",
                "base_delay_ms must be greater than 0",
            ));
        }
        if ch.max_delay_ms < ch.base_delay_ms {
            errors.push(ConfigError::error(
                "channel.max_delay_ms",
                "max_delay_ms must not be smaller than base_delay_ms",
            ));
        }
        if ch.connect_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "channel.connect_timeout_ms",
                "connect_timeout_ms must be greater than 0",
            ));
        } else if ch.connect_timeout_ms < 10_000 {
            errors.push(ConfigError::warning(
                "channel.connect_timeout_ms",
                "under 10s leaves little time to scan a pairing code",
            ));
        }
        if ch.send_attempts == 0 {
            errors.push(ConfigError::error(
                "channel.send_attempts",
                "send_attempts must be at least 1",
            ));
        }

        if !(self.bridge.url.starts_with("ws://") || self.bridge.url.starts_with("wss://")) {
            errors.push(ConfigError::error(
                "bridge.url",
                "bridge url must use the ws:// or wss:// scheme",
            ));
        }
        if self.bridge.send_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "bridge.send_timeout_ms",
                "send_timeout_ms must be greater than 0",
            ));
        }

        if self.credentials.dir.as_os_str().is_empty() {
            errors.push(ConfigError::error(
                "credentials.dir",
                "credentials directory must not be empty",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
