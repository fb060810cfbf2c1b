use serde::Serialize;

/// Structured trace events emitted across all Fieldlink crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ChannelStateChanged {
        session_id: Option<String>,
        state: String,
        detail: String,
    },
    ChannelRetryScheduled {
        session_id: Option<String>,
        retry: u32,
        retry_limit: u32,
        delay_ms: u64,
    },
    ChannelFailure {
        session_id: Option<String>,
        kind: String,
        detail: String,
    },
    ChannelDisconnected {
        session_id: Option<String>,
        detail: String,
    },
    PairingCodeIssued {
        session_id: Option<String>,
    },
    CredentialsSaved {
        session_id: Option<String>,
    },
    CredentialsCleared {
        detail: String,
    },
    MessageDelivered {
        session_id: Option<String>,
        message_id: String,
        attempts: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "fl_event");
    }
}
