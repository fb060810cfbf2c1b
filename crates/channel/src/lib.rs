//! `fl-channel`: supervisor for one persistent messaging-channel
//! connection.
//!
//! The network session is slow to establish (it may need an operator to
//! pair a device) and drops for reasons ranging from a network blip to a
//! revoked login.  The supervisor hides that behind five calls and makes
//! sure no two concurrent callers ever open two sessions.
//!
//! # Architecture
//!
//! ```text
//!   acquire / send_message / disconnect / is_healthy / status
//!                            │
//!              ┌─────────────▼──────────────┐
//!              │    ConnectionSupervisor    │── StatusObserver
//!              │  single flight, retries,   │── PairingDisplay
//!              │  logged-out latch          │── CredentialStore
//!              └─────────────┬──────────────┘
//!                            │ open(credentials)
//!              ┌─────────────▼──────────────┐
//!              │   Transport (BridgeTransport over WebSocket)
//!              └─────────────┬──────────────┘
//!                            │ Pairing / Ready / Closed / CredentialsChanged
//!                            ▼
//!                  Session state machine
//!     Idle → Connecting → AwaitingPairing → Ready → Closed
//! ```
//!
//! # Failure handling
//!
//! - Recoverable closes (network loss, timeouts, restart-required) retry
//!   with capped exponential back-off, up to `retry_limit` attempts.
//! - Fatal closes (logged out, bad session, replaced) stop immediately and
//!   latch; nothing reconnects until credentials are cleared.
//! - Recipient and body validation happen before any network activity.

pub mod backoff;
pub mod bridge;
pub mod builder;
pub mod credentials;
pub mod observer;
pub mod pairing;
pub mod recipient;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use backoff::{RetryPolicy, SendRetry};
pub use bridge::BridgeTransport;
pub use builder::SupervisorBuilder;
pub use credentials::{
    CredentialGate, CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore,
    SaveOutcome,
};
pub use observer::{RetryInfo, StatusEvent, StatusKind, StatusObserver, TracingObserver};
pub use pairing::{LogPairingDisplay, NoopPairingDisplay, PairingDisplay};
pub use recipient::Recipient;
pub use session::{InvalidTransition, SessionHandle, SessionState};
pub use supervisor::{ChannelPhase, ChannelStatus, ConnectionSupervisor};
pub use transport::{
    DisconnectReason, OpenedSession, ReasonClass, Transport, TransportError, TransportEvent,
    TransportHandle, EVENT_CHANNEL_CAPACITY,
};
pub use types::{AccountIdentity, ChannelError, DeliveryReceipt};
