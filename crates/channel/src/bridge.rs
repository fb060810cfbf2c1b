//! [`Transport`] over a local WebSocket bridge.
//!
//! Each `open` dials the bridge, sends an `open` frame with the stored
//! credential material, and splits the socket into a writer task (frames
//! out, keep-alive pings) and a reader task (frames in, translated to
//! [`TransportEvent`]s).  Sends are matched to their `send_result` by
//! request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use fl_domain::config::BridgeConfig;
use fl_protocol::{BridgeFrame, PROTOCOL_VERSION};

use crate::credentials::Credentials;
use crate::recipient::Recipient;
use crate::transport::{
    DisconnectReason, OpenedSession, Transport, TransportError, TransportEvent, TransportHandle,
    EVENT_CHANNEL_CAPACITY,
};
use crate::types::{AccountIdentity, DeliveryReceipt};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Opens sessions through the bridge sidecar.
pub struct BridgeTransport {
    config: BridgeConfig,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn open(&self, credentials: Option<Credentials>) -> Result<OpenedSession, TransportError> {
        tracing::info!(url = %self.config.url, "connecting to bridge");
        let (ws, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        // ── Send open ────────────────────────────────────────────────
        let open = BridgeFrame::Open {
            protocol_version: PROTOCOL_VERSION,
            credentials: credentials.map(|c| c.0),
            client_name: self.config.client_name.clone(),
            keep_alive_ms: self.config.keep_alive_ms,
        };
        let json = serde_json::to_string(&open).map_err(|e| TransportError::Protocol(e.to_string()))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<BridgeFrame>(64);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let link = Arc::new(BridgeLink {
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            send_timeout: Duration::from_millis(self.config.send_timeout_ms),
        });

        let keep_alive = Duration::from_millis(self.config.keep_alive_ms).max(MIN_KEEP_ALIVE);
        tokio::spawn(write_loop(sink, outbound_rx, link.cancel.clone(), keep_alive));
        tokio::spawn(read_loop(stream, link.clone(), event_tx));

        Ok(OpenedSession {
            handle: Arc::new(BridgeHandle { link }),
            events: event_rx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SendOutcome {
    ok: bool,
    message_id: Option<String>,
    error: Option<String>,
    retryable: bool,
}

/// State shared by the handle and the socket tasks.
struct BridgeLink {
    outbound: mpsc::Sender<BridgeFrame>,
    pending: Mutex<HashMap<String, oneshot::Sender<SendOutcome>>>,
    open: AtomicBool,
    /// Set when we asked for the close ourselves.
    closing: AtomicBool,
    cancel: CancellationToken,
    send_timeout: Duration,
}

struct BridgeHandle {
    link: Arc<BridgeLink>,
}

#[async_trait]
impl TransportHandle for BridgeHandle {
    async fn send(&self, to: &Recipient, body: &str) -> Result<DeliveryReceipt, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.link.pending.lock().insert(request_id.clone(), tx);

        let frame = BridgeFrame::Send {
            request_id: request_id.clone(),
            to: to.chat_address(),
            text: body.to_owned(),
        };
        if self.link.outbound.send(frame).await.is_err() {
            self.link.pending.lock().remove(&request_id);
            return Err(TransportError::Closed);
        }

        let outcome = match tokio::time::timeout(self.link.send_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped: the reader ended with this send unanswered.
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                self.link.pending.lock().remove(&request_id);
                return Err(TransportError::Timeout(format!(
                    "no send_result within {}ms",
                    self.link.send_timeout.as_millis()
                )));
            }
        };

        if !outcome.ok {
            let message = outcome.error.unwrap_or_else(|| "send rejected".into());
            return Err(if outcome.retryable {
                TransportError::Retryable(message)
            } else {
                TransportError::Rejected(message)
            });
        }

        Ok(DeliveryReceipt {
            message_id: outcome.message_id.unwrap_or(request_id),
            recipient: to.digits().to_owned(),
            sent_at: Utc::now(),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        self.link
            .outbound
            .send(BridgeFrame::Logout)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.link.closing.store(true, Ordering::SeqCst);
        self.link.open.store(false, Ordering::SeqCst);
        self.link.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<BridgeFrame>,
    cancel: CancellationToken,
    keep_alive: Duration,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
    loop {
        // Queued frames go first so a logout is flushed before the close.
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ping.tick() => BridgeFrame::Ping {
                timestamp: Utc::now().timestamp_millis(),
            },
        };

        let json = match serde_json::to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, frame = frame.kind(), "failed to serialize bridge frame");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    link: Arc<BridgeLink>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut close_reason = None;

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = link.cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else {
            break;
        };

        match msg {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<BridgeFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to parse bridge frame");
                        continue;
                    }
                };
                let event = match frame {
                    BridgeFrame::Pairing { code } => TransportEvent::Pairing { code },
                    BridgeFrame::Ready { id, name } => TransportEvent::Ready {
                        identity: AccountIdentity { id, name },
                    },
                    BridgeFrame::CredentialsUpdate { material } => {
                        TransportEvent::CredentialsChanged(Credentials(material))
                    }
                    BridgeFrame::Closed {
                        status_code,
                        message,
                    } => {
                        tracing::info!(status_code, message = ?message, "bridge reported session closed");
                        close_reason = Some(DisconnectReason::from_status_code(status_code));
                        break;
                    }
                    BridgeFrame::SendResult {
                        request_id,
                        ok,
                        message_id,
                        error,
                        retryable,
                    } => {
                        match link.pending.lock().remove(&request_id) {
                            Some(tx) => {
                                let _ = tx.send(SendOutcome {
                                    ok,
                                    message_id,
                                    error,
                                    retryable,
                                });
                            }
                            None => tracing::debug!(request_id = %request_id, "send_result for unknown request"),
                        }
                        continue;
                    }
                    BridgeFrame::Ping { timestamp } => {
                        let _ = link.outbound.send(BridgeFrame::Pong { timestamp }).await;
                        continue;
                    }
                    BridgeFrame::Pong { .. } => {
                        tracing::trace!("received pong");
                        continue;
                    }
                    other => {
                        tracing::debug!(frame = other.kind(), "ignoring unexpected bridge frame");
                        continue;
                    }
                };
                if events.send(event).await.is_err() {
                    // Nobody is listening any more.
                    break;
                }
            }
            Message::Close(_) => {
                tracing::info!("bridge closed connection");
                break;
            }
            _ => {}
        }
    }

    link.open.store(false, Ordering::SeqCst);
    link.cancel.cancel();
    // Dropping the senders fails every unanswered send with `Closed`.
    link.pending.lock().clear();

    let reason = close_reason.unwrap_or(if link.closing.load(Ordering::SeqCst) {
        DisconnectReason::ConnectionClosed
    } else {
        DisconnectReason::ConnectionLost
    });
    let _ = events.send(TransportEvent::Closed { reason }).await;
}
