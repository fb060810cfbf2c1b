//! The connection supervisor: owns at most one live session, runs
//! connection cycles with retry and back-off, and hands sessions to
//! concurrent callers without ever opening two at once.
//!
//! # Single flight
//!
//! `acquire()` takes the state lock once and, in that same critical
//! section, either returns the live session, clones the in-flight
//! attempt future, or installs a new one.  The attempt runs on its own
//! task, so callers that give up waiting never orphan it; everyone
//! awaiting the shared future receives the same outcome.
//!
//! # Cycle
//!
//! One cycle makes up to `retry_limit` attempts.  Each attempt builds a
//! fresh [`Session`], opens the transport and drains its events until
//! `Ready`, `Closed`, or the connect deadline.  Recoverable closes back
//! off and retry; fatal closes, timeouts, and an exhausted budget end
//! the cycle with an error.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff::{RetryPolicy, SendRetry};
use crate::builder::SupervisorBuilder;
use crate::credentials::{CredentialGate, Credentials, SaveOutcome};
use crate::observer::{RetryInfo, StatusEvent, StatusKind, StatusObserver};
use crate::pairing::PairingDisplay;
use crate::recipient::Recipient;
use crate::session::{Session, SessionHandle, SessionState};
use crate::transport::{DisconnectReason, Transport, TransportEvent};
use crate::types::{AccountIdentity, ChannelError, DeliveryReceipt};

type AttemptFuture = Shared<BoxFuture<'static, Result<SessionHandle, ChannelError>>>;

/// How long `acquire()` waits for a dead session's watcher to report why
/// it closed before replacing the session on its own.
const CLOSE_VERDICT_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct InFlight {
    cycle: u64,
    /// Session of the attempt currently running, if any.
    attempt: Option<Arc<Session>>,
    /// Child of the shutdown token; also cancelled by a fatal close.
    cancel: CancellationToken,
    future: AttemptFuture,
}

#[derive(Default)]
struct ConnectionState {
    /// Only ever holds a session that reached `Ready`.
    current: Option<Arc<Session>>,
    in_flight: Option<InFlight>,
    /// Failed attempts in the running (or last) cycle.
    retry_count: u32,
    /// Set by a fatal close; cleared only by `clear_credentials()`.
    logged_out: Option<String>,
    pairing_code: Option<String>,
    last_error: Option<ChannelError>,
    next_cycle: u64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    credentials: CredentialGate,
    pairing: Arc<dyn PairingDisplay>,
    observer: Arc<dyn StatusObserver>,
    retry: RetryPolicy,
    send_retry: SendRetry,
    connect_timeout: Duration,
    auto_reconnect: bool,
    shutdown: CancellationToken,
    state: Mutex<ConnectionState>,
}

/// Coarse connection phase for status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    Disconnected,
    Connecting,
    AwaitingPairing,
    BackingOff,
    Ready,
    LoggedOut,
}

/// Point-in-time view of the supervisor, computed under the state lock.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub phase: ChannelPhase,
    pub connected: bool,
    pub connecting: bool,
    pub retry_count: u32,
    pub retry_limit: u32,
    pub identity: Option<AccountIdentity>,
    pub session_id: Option<Uuid>,
    pub connected_since: Option<DateTime<Utc>>,
    /// Only while the running attempt waits for pairing.
    pub pairing_code: Option<String>,
    pub logged_out: bool,
    pub last_error: Option<String>,
    pub last_error_kind: Option<&'static str>,
}

/// A session that reached `Ready`, together with its remaining events.
struct ReadySession {
    session: Arc<Session>,
    events: mpsc::Receiver<TransportEvent>,
    generation: u64,
}

enum AcquireStep {
    /// The current session's socket is gone but its close is not yet
    /// accounted for.
    AwaitVerdict(Arc<Session>),
    Join(Result<AttemptFuture, ChannelError>),
}

enum CloseOutcome {
    /// Already handled, or the operator's own close.
    Ignored,
    LoggedOut { first: bool },
    Dropped { restarted: bool },
}

enum AttemptFailure {
    Recoverable(String),
    Fatal(DisconnectReason),
    TimedOut,
    Credentials(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide owner of the messaging channel.  Cheap to clone; all
/// clones share one connection state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    pub fn builder(transport: Arc<dyn Transport>) -> SupervisorBuilder {
        SupervisorBuilder::new(transport)
    }

    pub(crate) fn from_builder(b: SupervisorBuilder) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: b.transport,
                credentials: CredentialGate::new(b.credential_store),
                pairing: b.pairing,
                observer: b.observer,
                retry: b.retry,
                send_retry: b.send_retry,
                connect_timeout: b.connect_timeout,
                auto_reconnect: b.auto_reconnect,
                shutdown: CancellationToken::new(),
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Return a ready session, joining or starting a connection cycle
    /// when there is none.
    pub async fn acquire(&self) -> Result<SessionHandle, ChannelError> {
        loop {
            let step = {
                let mut st = self.inner.state.lock();
                match st.current.clone() {
                    Some(session) if session.is_alive() => {
                        return Ok(SessionHandle::new(session));
                    }
                    // Ready on paper, but the socket is gone.  Its watcher
                    // decides whether that was fatal.
                    Some(session) => AcquireStep::AwaitVerdict(session),
                    None => AcquireStep::Join(self.inner.join_or_start(&mut st)),
                }
            };

            match step {
                AcquireStep::AwaitVerdict(session) => {
                    self.inner.await_close_verdict(&session).await;
                }
                AcquireStep::Join(Ok(future)) => return future.await,
                AcquireStep::Join(Err(e)) => {
                    self.inner.record_failure(None, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Validate the recipient, acquire a session, and send `body`,
    /// retrying transient send failures a few times.
    pub async fn send_message(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let to = match Recipient::parse(recipient) {
            Ok(to) => to,
            Err(e) => {
                self.inner.record_failure(None, &e);
                return Err(e);
            }
        };
        if body.trim().is_empty() {
            let e = ChannelError::EmptyMessage;
            self.inner.record_failure(None, &e);
            return Err(e);
        }

        let budget = self.inner.send_retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let session = self.acquire().await?;

            match session.send(&to, body).await {
                Ok(receipt) => {
                    let mut ev = StatusEvent::new(StatusKind::MessageSent, receipt.message_id.clone())
                        .session(session.id(), session.state());
                    ev.attempts = Some(attempt);
                    self.inner.observer.record(&ev);
                    return Ok(receipt);
                }
                Err(e) if e.is_transient() && attempt < budget => {
                    let delay = self.inner.send_retry.delay_after(attempt);
                    tracing::warn!(
                        session_id = %session.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "send failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.inner.shutdown.cancelled() => return Err(ChannelError::Shutdown),
                    }
                }
                Err(e) => {
                    let err = ChannelError::SendFailed {
                        attempts: attempt,
                        message: e.to_string(),
                    };
                    self.inner.record_failure(Some(session.id()), &err);
                    return Err(err);
                }
            }
        }
    }

    /// Log out the active session, if any, and forget it.  Idempotent.
    ///
    /// A connection cycle that is already running is left alone.
    pub async fn disconnect(&self) {
        let session = {
            let mut st = self.inner.state.lock();
            st.retry_count = 0;
            let session = st.current.take();
            // Before the logout, so the watcher ignores the close it causes.
            if let Some(session) = &session {
                session.mark_closed_by_operator();
            }
            session
        };

        let Some(session) = session else {
            tracing::debug!("disconnect requested with no active session");
            return;
        };

        if let Some(transport) = session.transport() {
            if let Err(e) = transport.logout().await {
                tracing::warn!(session_id = %session.id(), error = %e, "logout failed, closing anyway");
            }
            transport.close().await;
        }

        tracing::info!(session_id = %session.id(), "channel disconnected");
        self.inner.observer.record(
            &StatusEvent::new(StatusKind::Disconnected, "disconnect requested")
                .session(session.id(), SessionState::Closed),
        );
    }

    /// True iff a ready session exists and its socket is open.
    pub fn is_healthy(&self) -> bool {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .is_some_and(|s| s.is_alive())
    }

    pub fn status(&self) -> ChannelStatus {
        let st = self.inner.state.lock();
        let live = st.current.as_ref().filter(|s| s.is_alive());
        let attempt = st.in_flight.as_ref().and_then(|f| f.attempt.as_ref());

        let phase = if live.is_some() {
            ChannelPhase::Ready
        } else if st.in_flight.is_some() {
            match attempt.map(|s| s.state()) {
                Some(SessionState::AwaitingPairing) => ChannelPhase::AwaitingPairing,
                Some(SessionState::Closed) => ChannelPhase::BackingOff,
                _ => ChannelPhase::Connecting,
            }
        } else if st.logged_out.is_some() {
            ChannelPhase::LoggedOut
        } else {
            ChannelPhase::Disconnected
        };

        ChannelStatus {
            phase,
            connected: live.is_some(),
            connecting: st.in_flight.is_some(),
            retry_count: st.retry_count,
            retry_limit: self.inner.retry.retry_limit,
            identity: live.and_then(|s| s.identity()),
            session_id: live.or(attempt).map(|s| s.id()),
            connected_since: live.and_then(|s| s.ready_at()),
            pairing_code: if phase == ChannelPhase::AwaitingPairing {
                st.pairing_code.clone()
            } else {
                None
            },
            logged_out: st.logged_out.is_some(),
            last_error: st.last_error.as_ref().map(|e| e.to_string()),
            last_error_kind: st.last_error.as_ref().map(|e| e.kind()),
        }
    }

    /// Wipe persisted credentials and release the logged-out latch, so
    /// the next `acquire()` pairs from scratch.  Never called
    /// automatically.
    pub async fn clear_credentials(&self) -> Result<(), ChannelError> {
        if let Err(e) = self.inner.credentials.clear().await {
            let err = ChannelError::Credentials(e.to_string());
            self.inner.record_failure(None, &err);
            return Err(err);
        }

        {
            let mut st = self.inner.state.lock();
            st.logged_out = None;
            if matches!(st.last_error, Some(ChannelError::SessionLoggedOut(_))) {
                st.last_error = None;
            }
        }

        tracing::info!("channel credentials cleared");
        self.inner.observer.record(&StatusEvent::new(
            StatusKind::CredentialsCleared,
            "credentials cleared by operator",
        ));
        Ok(())
    }

    /// Stop any running cycle, wait for it to unwind, then disconnect.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let pending = self
            .inner
            .state
            .lock()
            .in_flight
            .as_ref()
            .map(|f| f.future.clone());
        if let Some(pending) = pending {
            let _ = pending.await;
        }
        self.disconnect().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cycle driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    /// Join the running cycle or start one.  Must be called with the
    /// state lock held: this is the single-flight critical section.
    fn join_or_start(
        self: &Arc<Self>,
        st: &mut ConnectionState,
    ) -> Result<AttemptFuture, ChannelError> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::Shutdown);
        }
        if let Some(reason) = &st.logged_out {
            return Err(ChannelError::SessionLoggedOut(reason.clone()));
        }
        if let Some(in_flight) = &st.in_flight {
            return Ok(in_flight.future.clone());
        }

        st.retry_count = 0;
        let cycle = st.next_cycle;
        st.next_cycle += 1;

        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(Arc::clone(self).run_cycle(cycle, cancel.clone()));
        let weak = Arc::downgrade(self);
        let future = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.abandon_cycle(cycle);
                    }
                    Err(ChannelError::Internal(format!("connect task ended abnormally: {e}")))
                }
            }
        }
        .boxed()
        .shared();

        st.in_flight = Some(InFlight {
            cycle,
            attempt: None,
            cancel,
            future: future.clone(),
        });
        tracing::debug!(cycle, "connection cycle started");
        Ok(future)
    }

    async fn run_cycle(
        self: Arc<Self>,
        cycle: u64,
        cancel: CancellationToken,
    ) -> Result<SessionHandle, ChannelError> {
        let outcome = tokio::select! {
            r = self.attempt_until_settled(cycle) => r,
            _ = cancel.cancelled() => Err(self.cancelled_cycle_error()),
        };

        // Commit the outcome and release the in-flight slot in one step,
        // so no caller ever observes "no session and nothing in flight"
        // while a ready session is about to be installed.
        let (result, abandoned) = {
            let mut st = self.state.lock();
            let abandoned = match st.in_flight.take() {
                Some(f) if f.cycle == cycle => f.attempt,
                other => {
                    st.in_flight = other;
                    None
                }
            };
            st.pairing_code = None;
            match outcome {
                // A fatal close of the previous session landed while this
                // cycle was finishing: the account is gone.
                Ok(ready) if st.logged_out.is_some() => {
                    let reason = st.logged_out.clone().unwrap_or_default();
                    let e = ChannelError::SessionLoggedOut(reason);
                    st.last_error = Some(e.clone());
                    (Err(e), Some(ready.session))
                }
                Ok(ready) => {
                    st.current = Some(ready.session.clone());
                    st.retry_count = 0;
                    st.last_error = None;
                    (Ok(ready), None)
                }
                Err(e) => {
                    if let ChannelError::SessionLoggedOut(reason) = &e {
                        st.logged_out = Some(reason.clone());
                    }
                    st.last_error = Some(e.clone());
                    (Err(e), abandoned)
                }
            }
        };

        match result {
            Ok(ready) => {
                let handle = SessionHandle::new(ready.session.clone());
                tokio::spawn(watch_session(
                    Arc::downgrade(&self),
                    ready.session,
                    ready.events,
                    ready.generation,
                    self.shutdown.clone(),
                ));
                Ok(handle)
            }
            Err(e) => {
                // A cancelled attempt may still hold an open transport.
                if let Some(session) = abandoned {
                    if session.mark_closed(DisconnectReason::ConnectionClosed) {
                        if let Some(transport) = session.transport() {
                            transport.close().await;
                        }
                        self.record_transition(&session, "attempt abandoned");
                    }
                }
                self.record_failure(None, &e);
                Err(e)
            }
        }
    }

    async fn attempt_until_settled(&self, cycle: u64) -> Result<ReadySession, ChannelError> {
        let mut failures: u32 = 0;
        loop {
            let detail = match self.attempt(cycle).await {
                Ok(ready) => return Ok(ready),
                Err(AttemptFailure::Fatal(reason)) => {
                    return Err(ChannelError::SessionLoggedOut(reason.to_string()));
                }
                Err(AttemptFailure::TimedOut) => {
                    return Err(ChannelError::ConnectionTimeout(self.connect_timeout));
                }
                Err(AttemptFailure::Credentials(detail)) => {
                    return Err(ChannelError::Credentials(detail));
                }
                Err(AttemptFailure::Recoverable(detail)) => detail,
            };

            failures += 1;
            self.state.lock().retry_count = failures;
            if self.retry.is_exhausted(failures) {
                tracing::error!(attempts = failures, last_error = %detail, "connection retries exhausted");
                return Err(ChannelError::MaxRetriesExceeded(failures));
            }

            let delay = self.retry.delay_for_retry(failures);
            tracing::info!(
                retry = failures,
                retry_limit = self.retry.retry_limit,
                delay_ms = delay.as_millis() as u64,
                reason = %detail,
                "reconnecting"
            );
            let mut ev = StatusEvent::new(StatusKind::RetryScheduled, detail);
            ev.retry = Some(RetryInfo {
                retry: failures,
                retry_limit: self.retry.retry_limit,
                delay_ms: delay.as_millis() as u64,
            });
            self.observer.record(&ev);

            tokio::time::sleep(delay).await;
        }
    }

    /// One connect sequence on a brand-new session.
    async fn attempt(&self, cycle: u64) -> Result<ReadySession, AttemptFailure> {
        let session = Arc::new(Session::new());
        {
            let mut st = self.state.lock();
            if let Some(f) = st.in_flight.as_mut().filter(|f| f.cycle == cycle) {
                f.attempt = Some(session.clone());
            }
            st.pairing_code = None;
        }
        self.advance(&session, SessionState::Connecting, "attempt started");

        let deadline = Instant::now() + self.connect_timeout;

        let (material, generation) = match self.credentials.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                session.mark_closed(DisconnectReason::BadSession);
                self.record_transition(&session, "credential store unreadable");
                return Err(AttemptFailure::Credentials(e.to_string()));
            }
        };
        tracing::debug!(
            session_id = %session.id(),
            has_credentials = material.is_some(),
            "opening transport"
        );

        let opened = match tokio::time::timeout_at(deadline, self.transport.open(material)).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                session.mark_closed(DisconnectReason::ConnectionLost);
                self.record_transition(&session, format!("transport open failed: {e}"));
                return Err(AttemptFailure::Recoverable(e.to_string()));
            }
            Err(_) => {
                session.mark_closed(DisconnectReason::TimedOut);
                self.record_transition(&session, "transport open timed out");
                return Err(AttemptFailure::TimedOut);
            }
        };
        session.attach(opened.handle);
        let mut events = opened.events;

        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => TransportEvent::Closed {
                    reason: DisconnectReason::ConnectionLost,
                },
                Err(_) => {
                    session.mark_closed(DisconnectReason::TimedOut);
                    if let Some(transport) = session.transport() {
                        transport.close().await;
                    }
                    self.record_transition(&session, "not ready before the connect deadline");
                    return Err(AttemptFailure::TimedOut);
                }
            };

            match event {
                TransportEvent::Pairing { code } => {
                    self.advance(&session, SessionState::AwaitingPairing, "pairing code issued");
                    {
                        let mut st = self.state.lock();
                        if st.in_flight.as_ref().is_some_and(|f| f.cycle == cycle) {
                            st.pairing_code = Some(code.clone());
                        }
                    }
                    self.pairing.show(&code);
                    self.observer.record(
                        &StatusEvent::new(StatusKind::PairingIssued, "scan required")
                            .session(session.id(), session.state()),
                    );
                }
                TransportEvent::Ready { identity } => {
                    let detail = format!("authenticated as {}", identity.id);
                    match session.mark_ready(identity) {
                        Ok(_) => {
                            tracing::info!(session_id = %session.id(), "channel ready");
                            self.record_transition(&session, detail);
                            return Ok(ReadySession {
                                session,
                                events,
                                generation,
                            });
                        }
                        Err(e) => tracing::warn!(session_id = %session.id(), error = %e, "ignoring ready event"),
                    }
                }
                TransportEvent::Closed { reason } => {
                    session.mark_closed(reason);
                    self.record_transition(&session, format!("transport closed: {reason}"));
                    tracing::warn!(
                        session_id = %session.id(),
                        reason = %reason,
                        fatal = reason.is_fatal(),
                        "connection closed before ready"
                    );
                    return Err(if reason.is_fatal() {
                        AttemptFailure::Fatal(reason)
                    } else {
                        AttemptFailure::Recoverable(reason.to_string())
                    });
                }
                TransportEvent::CredentialsChanged(material) => {
                    self.persist(&session, &material, generation).await;
                }
            }
        }
    }

    /// A ready session's transport went away.  A fatal reason latches
    /// even when someone else closed the session first, unless that was
    /// the operator; it also fails any cycle already under way.
    fn on_ready_session_closed(self: &Arc<Self>, session: &Arc<Session>, reason: DisconnectReason) {
        let outcome = {
            let mut st = self.state.lock();
            let first = session.mark_closed(reason);
            let was_current = st
                .current
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, session));
            if was_current {
                st.current = None;
            }

            if session.closed_by_operator() {
                CloseOutcome::Ignored
            } else if reason.is_fatal() {
                st.logged_out = Some(reason.to_string());
                st.last_error = Some(ChannelError::SessionLoggedOut(reason.to_string()));
                if let Some(in_flight) = &st.in_flight {
                    in_flight.cancel.cancel();
                }
                CloseOutcome::LoggedOut { first }
            } else if !(first && was_current) {
                CloseOutcome::Ignored
            } else if self.auto_reconnect {
                CloseOutcome::Dropped {
                    restarted: self.join_or_start(&mut st).is_ok(),
                }
            } else {
                CloseOutcome::Dropped { restarted: false }
            }
        };

        match outcome {
            CloseOutcome::Ignored => {}
            CloseOutcome::LoggedOut { first } => {
                tracing::warn!(session_id = %session.id(), reason = %reason, "session logged out");
                if first {
                    self.record_transition(session, format!("transport closed: {reason}"));
                }
                self.record_failure(
                    Some(session.id()),
                    &ChannelError::SessionLoggedOut(reason.to_string()),
                );
            }
            CloseOutcome::Dropped { restarted } => {
                tracing::warn!(session_id = %session.id(), reason = %reason, restarted, "ready session closed");
                self.record_transition(session, format!("transport closed: {reason}"));
            }
        }
    }

    /// Wait for the watcher of a session that failed its liveness probe
    /// to report the close.  A transport that never reports one gets the
    /// session closed as lost once the grace period runs out.
    async fn await_close_verdict(self: &Arc<Self>, session: &Arc<Session>) {
        tokio::select! {
            _ = session.closed() => {}
            _ = tokio::time::sleep(CLOSE_VERDICT_GRACE) => {
                tracing::warn!(session_id = %session.id(), "session failed liveness probe without a close event, replacing it");
                if let Some(transport) = session.transport() {
                    transport.close().await;
                }
            }
        }
        // No-op when the watcher got there first; otherwise releases `current`.
        self.on_ready_session_closed(session, DisconnectReason::ConnectionLost);
    }

    fn cancelled_cycle_error(&self) -> ChannelError {
        if self.shutdown.is_cancelled() {
            return ChannelError::Shutdown;
        }
        match &self.state.lock().logged_out {
            Some(reason) => ChannelError::SessionLoggedOut(reason.clone()),
            None => ChannelError::Internal("connection cycle cancelled".into()),
        }
    }

    fn abandon_cycle(&self, cycle: u64) {
        let mut st = self.state.lock();
        if st.in_flight.as_ref().is_some_and(|f| f.cycle == cycle) {
            st.in_flight = None;
        }
    }

    async fn persist(&self, session: &Session, material: &Credentials, generation: u64) {
        match self.credentials.save(material, generation).await {
            Ok(SaveOutcome::Saved) => {
                tracing::debug!(session_id = %session.id(), "credentials saved");
                self.observer.record(
                    &StatusEvent::new(StatusKind::CredentialsSaved, "credentials rotated")
                        .session(session.id(), session.state()),
                );
            }
            Ok(SaveOutcome::Stale) => {
                tracing::info!(session_id = %session.id(), "dropping credential update issued before a reset");
            }
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "failed to persist credentials");
            }
        }
    }

    fn advance(&self, session: &Session, to: SessionState, detail: &str) {
        match session.transition(to) {
            Ok(_) => self.record_transition(session, detail),
            Err(e) => tracing::warn!(session_id = %session.id(), error = %e, "transition rejected"),
        }
    }

    fn record_transition(&self, session: &Session, detail: impl Into<String>) {
        self.observer.record(
            &StatusEvent::new(StatusKind::Transition, detail).session(session.id(), session.state()),
        );
    }

    fn record_failure(&self, session_id: Option<Uuid>, error: &ChannelError) {
        let mut ev = StatusEvent::new(StatusKind::Failure, error.to_string());
        ev.session_id = session_id;
        ev.error_kind = Some(error.kind());
        self.observer.record(&ev);
    }
}

/// Drain the events of a ready session: persist credential rotations and
/// react to the close.
async fn watch_session(
    weak: Weak<Inner>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<TransportEvent>,
    generation: u64,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            ev = events.recv() => ev,
            _ = shutdown.cancelled() => return,
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match event {
            Some(TransportEvent::CredentialsChanged(material)) => {
                inner.persist(&session, &material, generation).await;
            }
            Some(TransportEvent::Closed { reason }) => {
                inner.on_ready_session_closed(&session, reason);
                return;
            }
            Some(other) => {
                tracing::debug!(session_id = %session.id(), event = ?other, "ignoring event on ready session");
            }
            None => {
                inner.on_ready_session_closed(&session, DisconnectReason::ConnectionLost);
                return;
            }
        }
    }
}
