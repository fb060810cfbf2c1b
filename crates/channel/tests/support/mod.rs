//! Scripted transport and recording collaborators shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use fl_channel::{
    AccountIdentity, ConnectionSupervisor, Credentials, DeliveryReceipt, DisconnectReason,
    MemoryCredentialStore, OpenedSession, PairingDisplay, Recipient, RetryPolicy, StatusEvent,
    StatusKind, StatusObserver, SupervisorBuilder, Transport, TransportError, TransportEvent,
    TransportHandle, EVENT_CHANNEL_CAPACITY,
};

pub fn identity() -> AccountIdentity {
    AccountIdentity {
        id: "15550001111@s.whatsapp.net".into(),
        name: Some("Field Ops".into()),
    }
}

/// What one `open()` call does.
#[derive(Debug, Clone)]
pub enum Plan {
    Ready,
    /// Ready after `delay`, without pairing.
    ReadyAfter(Duration),
    /// Issue a pairing code, then become ready after `delay`.
    PairThenReady { code: String, delay: Duration },
    /// Issue a pairing code and wait for the test to push more events.
    PairAndWait(String),
    Close(DisconnectReason),
    /// Accept the socket and never say anything.
    Hang,
    FailOpen,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Follows a queue of [`Plan`]s, one per `open()`; `Ready` once the
/// queue is empty.
#[derive(Default)]
pub struct MockTransport {
    opens: AtomicU32,
    plans: Mutex<VecDeque<Plan>>,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    seen_credentials: Mutex<Vec<Option<Credentials>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(plans: impl IntoIterator<Item = Plan>) -> Arc<Self> {
        let t = Self::default();
        t.plans.lock().extend(plans);
        Arc::new(t)
    }

    pub fn push(&self, plan: Plan) {
        self.plans.lock().push_back(plan);
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_handle(&self) -> Arc<MockHandle> {
        self.handles
            .lock()
            .last()
            .cloned()
            .expect("no session opened yet")
    }

    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    pub fn seen_credentials(&self) -> Vec<Option<Credentials>> {
        self.seen_credentials.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, credentials: Option<Credentials>) -> Result<OpenedSession, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.seen_credentials.lock().push(credentials);
        let plan = self.plans.lock().pop_front().unwrap_or(Plan::Ready);

        if matches!(plan, Plan::FailOpen) {
            return Err(TransportError::Io("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = Arc::new(MockHandle::new(tx.clone()));
        self.handles.lock().push(handle.clone());

        match plan {
            Plan::Ready => {
                let _ = tx.try_send(TransportEvent::Ready {
                    identity: identity(),
                });
            }
            Plan::ReadyAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx
                        .send(TransportEvent::Ready {
                            identity: identity(),
                        })
                        .await;
                });
            }
            Plan::PairThenReady { code, delay } => {
                tokio::spawn(async move {
                    let _ = tx.send(TransportEvent::Pairing { code }).await;
                    tokio::time::sleep(delay).await;
                    let _ = tx
                        .send(TransportEvent::Ready {
                            identity: identity(),
                        })
                        .await;
                });
            }
            Plan::PairAndWait(code) => {
                let _ = tx.try_send(TransportEvent::Pairing { code });
            }
            Plan::Close(reason) => {
                handle.open.store(false, Ordering::SeqCst);
                let _ = tx.try_send(TransportEvent::Closed { reason });
            }
            Plan::Hang | Plan::FailOpen => {}
        }

        Ok(OpenedSession {
            handle,
            events: rx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MockHandle {
    open: AtomicBool,
    events: mpsc::Sender<TransportEvent>,
    sent: Mutex<Vec<(String, String)>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    logouts: AtomicU32,
    closes: AtomicU32,
}

impl MockHandle {
    fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            open: AtomicBool::new(true),
            events,
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            logouts: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        }
    }

    /// Push an event as if the network produced it.
    pub fn emit(&self, event: TransportEvent) {
        self.events
            .try_send(event)
            .expect("event channel full or closed");
    }

    /// Simulate the network dropping the socket.
    pub fn drop_connection(&self, reason: DisconnectReason) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.try_send(TransportEvent::Closed { reason });
    }

    /// Socket dies without the transport reporting a close.
    pub fn go_quiet(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().push_back(error);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn logouts(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send(&self, to: &Recipient, body: &str) -> Result<DeliveryReceipt, TransportError> {
        if let Some(err) = self.send_failures.lock().pop_front() {
            return Err(err);
        }
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut sent = self.sent.lock();
        sent.push((to.chat_address(), body.to_owned()));
        Ok(DeliveryReceipt {
            message_id: format!("MSG{}", sent.len()),
            recipient: to.digits().to_owned(),
            sent_at: Utc::now(),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        // The network confirms a logout with 401, like any other unlink.
        let _ = self.events.try_send(TransportEvent::Closed {
            reason: DisconnectReason::LoggedOut,
        });
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recording collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: StatusKind) -> Vec<StatusEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl StatusObserver for RecordingObserver {
    fn record(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingPairing {
    codes: Mutex<Vec<String>>,
}

impl RecordingPairing {
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().clone()
    }
}

impl PairingDisplay for RecordingPairing {
    fn show(&self, code: &str) {
        self.codes.lock().push(code.to_owned());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub supervisor: ConnectionSupervisor,
    pub transport: Arc<MockTransport>,
    pub observer: Arc<RecordingObserver>,
    pub store: Arc<MemoryCredentialStore>,
    pub pairing: Arc<RecordingPairing>,
}

impl Harness {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self::with(transport, |b| b)
    }

    /// Defaults: 1s base delay, 30s cap, 5 attempts, 60s connect
    /// timeout, no auto-reconnect.  `tweak` overrides any of it.
    pub fn with(
        transport: Arc<MockTransport>,
        tweak: impl FnOnce(SupervisorBuilder) -> SupervisorBuilder,
    ) -> Self {
        let observer = Arc::new(RecordingObserver::default());
        let store = Arc::new(MemoryCredentialStore::new());
        let pairing = Arc::new(RecordingPairing::default());

        let builder = SupervisorBuilder::new(transport.clone())
            .credential_store(store.clone())
            .observer(observer.clone())
            .pairing_display(pairing.clone())
            .retry_policy(RetryPolicy::default())
            .connect_timeout(Duration::from_secs(60))
            .auto_reconnect(false);

        Self {
            supervisor: tweak(builder).build(),
            transport,
            observer,
            store,
            pairing,
        }
    }
}

/// Poll `check` until it holds, sleeping between tries.  Works under a
/// paused clock because the sleeps auto-advance.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
