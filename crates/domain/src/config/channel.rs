use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection lifecycle knobs for the messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Connection attempts per cycle before `MaxRetriesExceeded`.
    #[serde(default = "d_retry_limit")]
    pub retry_limit: u32,
    /// Delay before the first retry; doubles per retry.
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the retry delay.
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Deadline for one attempt to reach `Ready` (pairing included).
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Attempts per `send_message` call on transient send errors.
    #[serde(default = "d_send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "d_send_retry_delay_ms")]
    pub send_retry_delay_ms: u64,
    /// Start a new connection cycle when a ready session drops for a
    /// recoverable reason, without waiting for the next caller.
    #[serde(default = "d_true")]
    pub auto_reconnect: bool,
    /// Connect in the background as soon as the gateway boots.
    #[serde(default = "d_true")]
    pub connect_on_startup: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_limit: d_retry_limit(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            connect_timeout_ms: d_connect_timeout_ms(),
            send_attempts: d_send_attempts(),
            send_retry_delay_ms: d_send_retry_delay_ms(),
            auto_reconnect: true,
            connect_on_startup: true,
        }
    }
}

impl ChannelConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WebSocket endpoint of the sidecar that speaks the chat network's
/// protocol on our behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "d_bridge_url")]
    pub url: String,
    /// Browser/client name the bridge announces to the network.
    #[serde(default = "d_client_name")]
    pub client_name: String,
    #[serde(default = "d_keep_alive_ms")]
    pub keep_alive_ms: u64,
    #[serde(default = "d_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: d_bridge_url(),
            client_name: d_client_name(),
            keep_alive_ms: d_keep_alive_ms(),
            send_timeout_ms: d_send_timeout_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding the persisted pairing material.
    #[serde(default = "d_credentials_dir")]
    pub dir: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: d_credentials_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_retry_limit() -> u32 {
    5
}
fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    30_000
}
fn d_connect_timeout_ms() -> u64 {
    60_000
}
fn d_send_attempts() -> u32 {
    3
}
fn d_send_retry_delay_ms() -> u64 {
    500
}
fn d_true() -> bool {
    true
}
fn d_bridge_url() -> String {
    "ws://127.0.0.1:3301/bridge".into()
}
fn d_client_name() -> String {
    "Fieldlink".into()
}
fn d_keep_alive_ms() -> u64 {
    25_000
}
fn d_send_timeout_ms() -> u64 {
    15_000
}
fn d_credentials_dir() -> PathBuf {
    PathBuf::from("./data/auth")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_defaults() {
        let cfg: ChannelConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.retry_limit, 5);
        assert_eq!(cfg.base_delay(), Duration::from_secs(1));
        assert_eq!(cfg.max_delay(), Duration::from_secs(30));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.send_attempts, 3);
        assert!(cfg.auto_reconnect);
        assert!(cfg.connect_on_startup);
    }

    #[test]
    fn channel_overrides() {
        let toml_str = r#"
            retry_limit = 3
            base_delay_ms = 2000
            auto_reconnect = false
        "#;
        let cfg: ChannelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.retry_limit, 3);
        assert_eq!(cfg.base_delay(), Duration::from_secs(2));
        assert!(!cfg.auto_reconnect);
        assert!(cfg.connect_on_startup);
    }

    #[test]
    fn bridge_and_credentials_defaults() {
        let bridge = BridgeConfig::default();
        assert!(bridge.url.starts_with("ws://"));
        assert_eq!(bridge.keep_alive_ms, 25_000);
        let creds = CredentialsConfig::default();
        assert_eq!(creds.dir, PathBuf::from("./data/auth"));
    }
}
