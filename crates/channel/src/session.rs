//! One transport session and its lifecycle state machine.
//!
//! ```text
//! Idle ──▶ Connecting ──▶ AwaitingPairing ──▶ Ready
//!              │                 │   ▲          │
//!              │                 └───┘          │
//!              └───────────┬─────┴──────────────┘
//!                          ▼
//!                       Closed   (terminal, never reused)
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::recipient::Recipient;
use crate::transport::{DisconnectReason, TransportError, TransportHandle};
use crate::types::{AccountIdentity, DeliveryReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingPairing,
    Ready,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The transition table.  Re-entering `AwaitingPairing` is allowed
    /// because the network rotates pairing codes while it waits.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Idle, Connecting) => true,
            (Connecting, AwaitingPairing) | (AwaitingPairing, AwaitingPairing) => true,
            (Connecting, Ready) | (AwaitingPairing, Ready) => true,
            (Closed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionInner {
    state: SessionState,
    identity: Option<AccountIdentity>,
    ready_at: Option<DateTime<Utc>>,
    close_reason: Option<DisconnectReason>,
    /// Closed through `disconnect()`, so whatever close the transport
    /// reports afterwards is our own doing.
    closed_by_operator: bool,
}

/// One attempt at a transport session, from construction to closure.
///
/// Owned by the supervisor.  Outside the crate it is only reachable
/// through [`SessionHandle`], which cannot drive the lifecycle.
pub(crate) struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    inner: RwLock<SessionInner>,
    transport: OnceLock<Arc<dyn TransportHandle>>,
    /// Cancelled on entry to `Closed`.
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            inner: RwLock::new(SessionInner {
                state: SessionState::Idle,
                identity: None,
                ready_at: None,
                close_reason: None,
                closed_by_operator: false,
            }),
            transport: OnceLock::new(),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub(crate) fn identity(&self) -> Option<AccountIdentity> {
        self.inner.read().identity.clone()
    }

    pub(crate) fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ready_at
    }

    pub(crate) fn close_reason(&self) -> Option<DisconnectReason> {
        self.inner.read().close_reason
    }

    /// Apply one transition from the table.  Returns the previous state.
    pub(crate) fn transition(&self, to: SessionState) -> Result<SessionState, InvalidTransition> {
        let mut inner = self.inner.write();
        let from = inner.state;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        inner.state = to;
        if to == SessionState::Ready {
            inner.ready_at = Some(Utc::now());
        }
        drop(inner);
        if to == SessionState::Closed {
            self.closed.cancel();
        }
        Ok(from)
    }

    pub(crate) fn mark_ready(&self, identity: AccountIdentity) -> Result<SessionState, InvalidTransition> {
        let prev = self.transition(SessionState::Ready)?;
        self.inner.write().identity = Some(identity);
        Ok(prev)
    }

    /// Move to `Closed`.  Returns `false` when the session was already
    /// closed; the first reason wins.
    pub(crate) fn mark_closed(&self, reason: DisconnectReason) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = SessionState::Closed;
        inner.close_reason = Some(reason);
        drop(inner);
        self.closed.cancel();
        true
    }

    /// Like [`mark_closed`](Self::mark_closed), for a close the operator
    /// asked for.
    pub(crate) fn mark_closed_by_operator(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = SessionState::Closed;
        inner.close_reason = Some(DisconnectReason::ConnectionClosed);
        inner.closed_by_operator = true;
        drop(inner);
        self.closed.cancel();
        true
    }

    pub(crate) fn closed_by_operator(&self) -> bool {
        self.inner.read().closed_by_operator
    }

    /// Resolves once the session is `Closed`; immediately if it already is.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) fn attach(&self, handle: Arc<dyn TransportHandle>) {
        if self.transport.set(handle).is_err() {
            tracing::warn!(session_id = %self.id, "transport already attached, ignoring");
        }
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn TransportHandle>> {
        self.transport.get()
    }

    /// `Ready` and the socket still answers the liveness probe.
    pub(crate) fn is_alive(&self) -> bool {
        self.state() == SessionState::Ready
            && self.transport.get().is_some_and(|t| t.is_open())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Caller-facing handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What `acquire()` hands out: enough to send, nothing to steer the
/// lifecycle with.  Two handles are equal when they point at the same
/// session.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.session.created_at
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn identity(&self) -> Option<AccountIdentity> {
        self.session.identity()
    }

    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.session.ready_at()
    }

    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.session.close_reason()
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    /// Issue one send on this session.  No retries here.
    pub async fn send(&self, to: &Recipient, body: &str) -> Result<DeliveryReceipt, TransportError> {
        if self.session.state() != SessionState::Ready {
            return Err(TransportError::Closed);
        }
        let transport = self.session.transport().ok_or(TransportError::Closed)?;
        transport.send(to, body).await
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.session.id)
            .field("state", &self.session.state())
            .finish()
    }
}
