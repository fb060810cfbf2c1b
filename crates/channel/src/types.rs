//! Core types shared by the supervisor, its callers, and transports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The network account a session authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Proof that the transport accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    /// Normalized digits of the recipient.
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
}

/// Errors surfaced by the channel supervisor.
///
/// `Clone` because one attempt outcome is handed to every caller that
/// was waiting on it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection timeout: transport not ready after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),
    #[error("session logged out: {0}")]
    SessionLoggedOut(String),
    #[error("max retries exceeded after {0} attempts")]
    MaxRetriesExceeded(u32),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("message body must not be empty")]
    EmptyMessage,
    #[error("send failed after {attempts} attempts: {message}")]
    SendFailed { attempts: u32, message: String },
    #[error("credential store: {0}")]
    Credentials(String),
    #[error("shutdown")]
    Shutdown,
    #[error("internal: {0}")]
    Internal(String),
}

impl ChannelError {
    /// Stable snake_case name, used in logs, trace events, and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionTimeout(_) => "connection_timeout",
            Self::SessionLoggedOut(_) => "session_logged_out",
            Self::MaxRetriesExceeded(_) => "max_retries_exceeded",
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::EmptyMessage => "empty_message",
            Self::SendFailed { .. } => "send_failed",
            Self::Credentials(_) => "credentials",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }

    /// Caller input errors: rejected before any network activity.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidRecipient(_) | Self::EmptyMessage)
    }
}
