//! Bridge protocol: JSON frames exchanged with the chat-network bridge.
//!
//! The bridge is a sidecar process that owns the actual network session
//! (pairing, encryption, keep-alive).  Fieldlink drives it over a local
//! WebSocket: one socket per session, one JSON object per text frame.

use serde::{Deserialize, Serialize};

/// Bumped on incompatible frame changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeFrame {
    /// Gateway → Bridge: start a network session with the stored material.
    #[serde(rename = "open")]
    Open {
        protocol_version: u32,
        /// Persisted credential material, absent on first pairing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<serde_json::Value>,
        client_name: String,
        keep_alive_ms: u64,
    },

    /// Gateway → Bridge: deliver a text message.
    #[serde(rename = "send")]
    Send {
        request_id: String,
        to: String,
        text: String,
    },

    /// Gateway → Bridge: unlink this device and end the session.
    #[serde(rename = "logout")]
    Logout,

    /// Bridge → Gateway: the network wants out-of-band pairing.
    #[serde(rename = "pairing")]
    Pairing { code: String },

    /// Bridge → Gateway: the session is authenticated.
    #[serde(rename = "ready")]
    Ready {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Bridge → Gateway: the network session ended.
    #[serde(rename = "closed")]
    Closed {
        status_code: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Bridge → Gateway: credential material changed and must be persisted.
    #[serde(rename = "credentials_update")]
    CredentialsUpdate { material: serde_json::Value },

    /// Bridge → Gateway: outcome of a `send`.
    #[serde(rename = "send_result")]
    SendResult {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Whether retrying the same send may succeed.
        #[serde(default)]
        retryable: bool,
    },

    /// Bidirectional: heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl BridgeFrame {
    /// Short frame name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Send { .. } => "send",
            Self::Logout => "logout",
            Self::Pairing { .. } => "pairing",
            Self::Ready { .. } => "ready",
            Self::Closed { .. } => "closed",
            Self::CredentialsUpdate { .. } => "credentials_update",
            Self::SendResult { .. } => "send_result",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }
}
