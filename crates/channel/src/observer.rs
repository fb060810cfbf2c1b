//! Observability collaborator: every state change and failure is
//! reported here before it reaches a caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use fl_domain::trace::TraceEvent;

use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Transition,
    PairingIssued,
    RetryScheduled,
    Failure,
    Disconnected,
    CredentialsSaved,
    CredentialsCleared,
    MessageSent,
}

/// One status record.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub kind: StatusKind,
    /// Session state after the event, when a session is involved.
    pub state: Option<SessionState>,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<Uuid>,
    pub detail: String,
    /// Present on `RetryScheduled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInfo>,
    /// Present on `Failure`: the `ChannelError::kind()` raised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Present on `MessageSent`: send attempts used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetryInfo {
    pub retry: u32,
    pub retry_limit: u32,
    pub delay_ms: u64,
}

impl StatusEvent {
    pub fn new(kind: StatusKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            state: None,
            timestamp: Utc::now(),
            session_id: None,
            detail: detail.into(),
            retry: None,
            error_kind: None,
            attempts: None,
        }
    }

    pub fn session(mut self, id: Uuid, state: SessionState) -> Self {
        self.session_id = Some(id);
        self.state = Some(state);
        self
    }
}

/// Status sink.  Fire-and-forget.
pub trait StatusObserver: Send + Sync + 'static {
    fn record(&self, event: &StatusEvent);
}

/// Forwards status events to the structured trace log.
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn record(&self, event: &StatusEvent) {
        let session_id = event.session_id.map(|id| id.to_string());
        let trace = match event.kind {
            StatusKind::Transition => TraceEvent::ChannelStateChanged {
                session_id,
                state: event
                    .state
                    .map(|s| s.as_str().to_owned())
                    .unwrap_or_default(),
                detail: event.detail.clone(),
            },
            StatusKind::PairingIssued => TraceEvent::PairingCodeIssued { session_id },
            StatusKind::RetryScheduled => {
                let info = event.retry.unwrap_or(RetryInfo {
                    retry: 0,
                    retry_limit: 0,
                    delay_ms: 0,
                });
                TraceEvent::ChannelRetryScheduled {
                    session_id,
                    retry: info.retry,
                    retry_limit: info.retry_limit,
                    delay_ms: info.delay_ms,
                }
            }
            StatusKind::Failure => TraceEvent::ChannelFailure {
                session_id,
                kind: event.error_kind.unwrap_or("unknown").to_owned(),
                detail: event.detail.clone(),
            },
            StatusKind::Disconnected => TraceEvent::ChannelDisconnected {
                session_id,
                detail: event.detail.clone(),
            },
            StatusKind::CredentialsSaved => TraceEvent::CredentialsSaved { session_id },
            StatusKind::CredentialsCleared => TraceEvent::CredentialsCleared {
                detail: event.detail.clone(),
            },
            StatusKind::MessageSent => TraceEvent::MessageDelivered {
                session_id,
                message_id: event.detail.clone(),
                attempts: event.attempts.unwrap_or(1),
            },
        };
        trace.emit();
    }
}
