//! Transport provider contract.
//!
//! The supervisor never speaks the chat network's protocol itself.  A
//! [`Transport`] opens one network session per call and pushes lifecycle
//! events into a channel; the supervisor drains that channel one event at
//! a time and runs the state transitions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::recipient::Recipient;
use crate::types::{AccountIdentity, DeliveryReceipt};

/// Bounded capacity for transport event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle events pushed by a transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Out-of-band pairing is required; `code` is shown to an operator.
    Pairing { code: String },
    /// The session authenticated.
    Ready { identity: AccountIdentity },
    /// The session ended.  Nothing follows this event.
    Closed { reason: DisconnectReason },
    /// Credential material rotated and must be persisted.
    CredentialsChanged(Credentials),
}

/// Everything [`Transport::open`] hands back.
pub struct OpenedSession {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens network sessions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start a session.  `credentials` is `None` when nothing is persisted
    /// yet, which makes the network ask for pairing.
    async fn open(&self, credentials: Option<Credentials>) -> Result<OpenedSession, TransportError>;
}

/// A live session, used for sending and for tearing it down.
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    async fn send(&self, to: &Recipient, body: &str) -> Result<DeliveryReceipt, TransportError>;

    /// Unlink this client from the account and end the session.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Drop the connection without unlinking.
    async fn close(&self);

    /// Socket-level liveness probe.  Must not suspend.
    fn is_open(&self) -> bool;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnect reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether a closed session is worth reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    Recoverable,
    Fatal,
}

/// Why a transport session ended, keyed by the network's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    RestartRequired,
    ServiceUnavailable,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    Forbidden,
    MultideviceMismatch,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            515 => Self::RestartRequired,
            503 => Self::ServiceUnavailable,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            403 => Self::Forbidden,
            411 => Self::MultideviceMismatch,
            other => Self::Unknown(other),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost | Self::TimedOut => 408,
            Self::RestartRequired => 515,
            Self::ServiceUnavailable => 503,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::Forbidden => 403,
            Self::MultideviceMismatch => 411,
            Self::Unknown(code) => *code,
        }
    }

    /// Fatal reasons need an operator (re-pair or clear credentials);
    /// retrying them would only repeat the rejection.  515 is the
    /// network asking for a reconnect after pairing, so it retries.
    pub fn classify(&self) -> ReasonClass {
        match self {
            Self::LoggedOut
            | Self::BadSession
            | Self::Forbidden
            | Self::MultideviceMismatch
            | Self::ConnectionReplaced => ReasonClass::Fatal,
            Self::ConnectionClosed
            | Self::ConnectionLost
            | Self::TimedOut
            | Self::RestartRequired
            | Self::ServiceUnavailable
            | Self::Unknown(_) => ReasonClass::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.classify() == ReasonClass::Fatal
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::TimedOut => "timed out",
            Self::RestartRequired => "restart required",
            Self::ServiceUnavailable => "service unavailable",
            Self::ConnectionReplaced => "connection replaced",
            Self::LoggedOut => "logged out",
            Self::BadSession => "bad session",
            Self::Forbidden => "forbidden",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{name} ({})", self.status_code())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(String),
    #[error("session closed")]
    Closed,
    #[error("timeout: {0}")]
    Timeout(String),
    /// The network refused the request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The network refused the request but asked us to try again.
    #[error("temporarily rejected: {0}")]
    Retryable(String),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::Timeout(_) | Self::Retryable(_)
        )
    }
}
