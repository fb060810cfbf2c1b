//! Builder pattern for constructing a [`ConnectionSupervisor`].

use std::sync::Arc;
use std::time::Duration;

use fl_domain::config::ChannelConfig;

use crate::backoff::{RetryPolicy, SendRetry};
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::observer::{StatusObserver, TracingObserver};
use crate::pairing::{LogPairingDisplay, PairingDisplay};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Transport;

/// Fluent builder for [`ConnectionSupervisor`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use fl_channel::{BridgeTransport, FileCredentialStore, SupervisorBuilder};
/// # use fl_domain::config::{BridgeConfig, ChannelConfig};
/// # fn main() -> fl_domain::error::Result<()> {
/// let store = FileCredentialStore::new(std::path::Path::new("./data/auth"))?;
/// let supervisor = SupervisorBuilder::new(Arc::new(BridgeTransport::new(BridgeConfig::default())))
///     .credential_store(Arc::new(store))
///     .configure(&ChannelConfig::default())
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct SupervisorBuilder {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) credential_store: Arc<dyn CredentialStore>,
    pub(crate) pairing: Arc<dyn PairingDisplay>,
    pub(crate) observer: Arc<dyn StatusObserver>,
    pub(crate) retry: RetryPolicy,
    pub(crate) send_retry: SendRetry,
    pub(crate) connect_timeout: Duration,
    pub(crate) auto_reconnect: bool,
}

impl SupervisorBuilder {
    /// Start from defaults: in-memory credentials, log pairing display,
    /// tracing observer, 5 attempts, 60s connect timeout.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            credential_store: Arc::new(MemoryCredentialStore::new()),
            pairing: Arc::new(LogPairingDisplay),
            observer: Arc::new(TracingObserver),
            retry: RetryPolicy::default(),
            send_retry: SendRetry::default(),
            connect_timeout: Duration::from_secs(60),
            auto_reconnect: true,
        }
    }

    /// Apply every tunable from the `[channel]` config section.
    pub fn configure(mut self, cfg: &ChannelConfig) -> Self {
        self.retry = RetryPolicy::from_config(cfg);
        self.send_retry = SendRetry::from_config(cfg);
        self.connect_timeout = cfg.connect_timeout();
        self.auto_reconnect = cfg.auto_reconnect;
        self
    }

    // ── Collaborators ────────────────────────────────────────────────

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    pub fn pairing_display(mut self, display: Arc<dyn PairingDisplay>) -> Self {
        self.pairing = display;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn send_retry(mut self, send_retry: SendRetry) -> Self {
        self.send_retry = send_retry;
        self
    }

    /// Per-attempt deadline for reaching `Ready`, pairing included.
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    /// Start a new cycle when a ready session drops for a recoverable
    /// reason (default on).
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn build(self) -> ConnectionSupervisor {
        ConnectionSupervisor::from_builder(self)
    }
}
