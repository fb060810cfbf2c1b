//! Integration tests: drive a [`ConnectionSupervisor`] against a scripted
//! transport and assert the connection lifecycle end to end.
//!
//! - concurrent callers share one connection attempt
//! - recoverable closes back off and retry up to the limit
//! - fatal closes latch until credentials are cleared
//! - bad input never reaches the transport
//! - a closed session is never handed out again

mod support;

use std::time::Duration;

use futures_util::future::join_all;

use fl_channel::{
    ChannelError, ChannelPhase, Credentials, DisconnectReason, Recipient, RetryPolicy, SendRetry,
    SessionState, StatusKind, TransportError, TransportEvent,
};

use support::{eventually, Harness, MockTransport, Plan};

// ── Acquisition ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_attempt() {
    let transport = MockTransport::scripted([Plan::PairThenReady {
        code: "2@ABCDEF".into(),
        delay: Duration::from_millis(200),
    }]);
    let h = Harness::new(transport.clone());

    let calls = (0..10).map(|_| {
        let sup = h.supervisor.clone();
        async move { sup.acquire().await }
    });
    let results = join_all(calls).await;

    assert_eq!(transport.opens(), 1);
    let first = results[0].clone().unwrap();
    for r in results {
        assert_eq!(r.unwrap(), first);
    }
    assert_eq!(first.state(), SessionState::Ready);
    assert_eq!(h.pairing.codes(), vec!["2@ABCDEF".to_string()]);
}

#[tokio::test]
async fn concurrent_acquires_share_one_fatal_failure() {
    let transport = MockTransport::scripted([Plan::Close(DisconnectReason::LoggedOut)]);
    let h = Harness::new(transport.clone());

    let calls = (0..10).map(|_| {
        let sup = h.supervisor.clone();
        async move { sup.acquire().await }
    });
    let results = join_all(calls).await;

    assert_eq!(transport.opens(), 1);
    let first = results[0].clone().unwrap_err();
    assert!(matches!(first, ChannelError::SessionLoggedOut(_)));
    for r in results {
        assert_eq!(r.unwrap_err(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_exhausted_cycle() {
    let transport = MockTransport::scripted(
        (0..2).map(|_| Plan::Close(DisconnectReason::ConnectionLost)),
    );
    let h = Harness::with(transport.clone(), |b| {
        b.retry_policy(RetryPolicy {
            retry_limit: 2,
            ..RetryPolicy::default()
        })
    });

    let calls = (0..10).map(|_| {
        let sup = h.supervisor.clone();
        async move { sup.acquire().await }
    });
    let results = join_all(calls).await;

    assert_eq!(transport.opens(), 2);
    for r in results {
        assert_eq!(r.unwrap_err(), ChannelError::MaxRetriesExceeded(2));
    }
}

#[tokio::test]
async fn healthy_acquire_is_idempotent() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    let a = h.supervisor.acquire().await.unwrap();
    let b = h.supervisor.acquire().await.unwrap();

    assert_eq!(a, b);
    assert_eq!(transport.opens(), 1);
    assert!(h.supervisor.is_healthy());

    let status = h.supervisor.status();
    assert_eq!(status.phase, ChannelPhase::Ready);
    assert!(status.connected);
    assert_eq!(status.identity.unwrap().id, "15550001111@s.whatsapp.net");
    assert!(status.connected_since.is_some());
}

#[tokio::test(start_paused = true)]
async fn caller_giving_up_does_not_cancel_the_attempt() {
    let transport = MockTransport::scripted([Plan::ReadyAfter(Duration::from_secs(5))]);
    let h = Harness::new(transport.clone());

    let sup = h.supervisor.clone();
    let impatient = tokio::spawn(async move { sup.acquire().await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    impatient.abort();

    let session = h.supervisor.acquire().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(transport.opens(), 1);
}

// ── Retry and back-off ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn recoverable_closes_back_off_then_succeed() {
    let transport = MockTransport::scripted([
        Plan::Close(DisconnectReason::ConnectionLost),
        Plan::Close(DisconnectReason::RestartRequired),
        Plan::Ready,
    ]);
    let h = Harness::new(transport.clone());

    let session = h.supervisor.acquire().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(transport.opens(), 3);

    let delays: Vec<u64> = h
        .observer
        .of_kind(StatusKind::RetryScheduled)
        .iter()
        .map(|e| e.retry.unwrap().delay_ms)
        .collect();
    assert_eq!(delays, vec![1_000, 2_000]);
    assert_eq!(h.supervisor.status().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_limit_caps_attempts() {
    let transport = MockTransport::scripted(
        (0..3).map(|_| Plan::Close(DisconnectReason::ConnectionLost)),
    );
    let h = Harness::with(transport.clone(), |b| {
        b.retry_policy(RetryPolicy {
            retry_limit: 3,
            ..RetryPolicy::default()
        })
    });

    let err = h.supervisor.acquire().await.unwrap_err();
    assert_eq!(err, ChannelError::MaxRetriesExceeded(3));
    assert_eq!(transport.opens(), 3);

    let status = h.supervisor.status();
    assert_eq!(status.retry_count, 3);
    assert_eq!(status.phase, ChannelPhase::Disconnected);
    assert_eq!(status.last_error_kind, Some("max_retries_exceeded"));

    // The failure reached the observer.
    let failures = h.observer.of_kind(StatusKind::Failure);
    assert_eq!(failures.last().unwrap().error_kind, Some("max_retries_exceeded"));

    // A later call starts a fresh cycle.
    let session = h.supervisor.acquire().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(transport.opens(), 4);
    assert_eq!(h.supervisor.status().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn open_errors_are_retried() {
    let transport = MockTransport::scripted([Plan::FailOpen, Plan::Ready]);
    let h = Harness::new(transport.clone());

    h.supervisor.acquire().await.unwrap();
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn attempt_times_out() {
    let transport = MockTransport::scripted([Plan::Hang]);
    let h = Harness::with(transport.clone(), |b| b.connect_timeout(Duration::from_secs(5)));

    let err = h.supervisor.acquire().await.unwrap_err();
    assert_eq!(err, ChannelError::ConnectionTimeout(Duration::from_secs(5)));
    assert_eq!(transport.opens(), 1);
    assert_eq!(transport.last_handle().closes(), 1);
    assert!(!h.supervisor.is_healthy());
}

// ── Fatal closes ────────────────────────────────────────────────────────

#[tokio::test]
async fn fatal_close_latches_until_credentials_cleared() {
    let transport = MockTransport::scripted([Plan::Close(DisconnectReason::LoggedOut)]);
    let h = Harness::new(transport.clone());

    let err = h.supervisor.acquire().await.unwrap_err();
    assert!(matches!(err, ChannelError::SessionLoggedOut(_)));
    assert_eq!(transport.opens(), 1);
    assert!(h.observer.of_kind(StatusKind::RetryScheduled).is_empty());

    // No new attempt while latched.
    let err = h.supervisor.acquire().await.unwrap_err();
    assert!(matches!(err, ChannelError::SessionLoggedOut(_)));
    assert_eq!(transport.opens(), 1);

    let status = h.supervisor.status();
    assert_eq!(status.phase, ChannelPhase::LoggedOut);
    assert!(status.logged_out);

    h.supervisor.clear_credentials().await.unwrap();
    assert!(!h.supervisor.status().logged_out);

    h.supervisor.acquire().await.unwrap();
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn fatal_close_of_ready_session_latches() {
    let transport = MockTransport::new();
    let h = Harness::with(transport.clone(), |b| b.auto_reconnect(true));

    let session = h.supervisor.acquire().await.unwrap();
    transport
        .last_handle()
        .drop_connection(DisconnectReason::ConnectionReplaced);

    let sup = h.supervisor.clone();
    eventually(|| sup.status().logged_out).await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn fatal_close_wins_over_an_eager_acquire() {
    let transport = MockTransport::new();
    let h = Harness::with(transport.clone(), |b| b.auto_reconnect(true));

    h.supervisor.acquire().await.unwrap();
    // Socket already dead, close event still queued for the watcher.
    transport
        .last_handle()
        .drop_connection(DisconnectReason::LoggedOut);

    let err = h.supervisor.acquire().await.unwrap_err();
    assert!(matches!(err, ChannelError::SessionLoggedOut(_)));
    assert_eq!(transport.opens(), 1);
    assert!(h.supervisor.status().logged_out);
}

#[tokio::test(start_paused = true)]
async fn late_fatal_close_fails_the_replacement_cycle() {
    let transport = MockTransport::scripted([Plan::Ready, Plan::Hang]);
    let h = Harness::new(transport.clone());

    h.supervisor.acquire().await.unwrap();
    let old = transport.last_handle();
    old.go_quiet();

    // No close event: acquire gives up waiting and opens a new session.
    let sup = h.supervisor.clone();
    let pending = tokio::spawn(async move { sup.acquire().await });
    let t = transport.clone();
    eventually(|| t.opens() == 2).await;
    assert_eq!(old.closes(), 1);

    // Then the old session reports it was logged out.
    old.emit(TransportEvent::Closed {
        reason: DisconnectReason::LoggedOut,
    });

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ChannelError::SessionLoggedOut(_)));
    assert!(h.supervisor.status().logged_out);
    assert_eq!(transport.last_handle().closes(), 1);
    assert_eq!(transport.opens(), 2);
}

// ── Sending ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_input_never_touches_transport() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    let err = h.supervisor.send_message("12345", "hi").await.unwrap_err();
    assert!(matches!(err, ChannelError::InvalidRecipient(_)));

    let err = h.supervisor.send_message("555-CALL-NOW", "hi").await.unwrap_err();
    assert!(matches!(err, ChannelError::InvalidRecipient(_)));

    let err = h.supervisor.send_message("+1 555 010 9999", "   ").await.unwrap_err();
    assert_eq!(err, ChannelError::EmptyMessage);

    assert_eq!(transport.opens(), 0);
    assert_eq!(h.observer.of_kind(StatusKind::Failure).len(), 3);
}

#[tokio::test]
async fn send_normalizes_recipient() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    let receipt = h
        .supervisor
        .send_message("+1 (555) 010-9999", "crew at site B")
        .await
        .unwrap();

    assert_eq!(receipt.recipient, "15550109999");
    assert_eq!(
        transport.last_handle().sent(),
        vec![("15550109999@s.whatsapp.net".to_string(), "crew at site B".to_string())]
    );
    let sent = h.observer.of_kind(StatusKind::MessageSent);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attempts, Some(1));
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());
    h.supervisor.acquire().await.unwrap();
    transport
        .last_handle()
        .fail_next_send(TransportError::Retryable("rate limited".into()));

    let receipt = h.supervisor.send_message("15550109999", "hello").await.unwrap();
    assert_eq!(receipt.recipient, "15550109999");
    assert_eq!(transport.last_handle().sent().len(), 1);
    assert_eq!(h.observer.of_kind(StatusKind::MessageSent)[0].attempts, Some(2));
}

#[tokio::test]
async fn rejected_send_is_not_retried() {
    let transport = MockTransport::new();
    let h = Harness::with(transport.clone(), |b| {
        b.send_retry(SendRetry {
            attempts: 3,
            delay: Duration::from_millis(1),
        })
    });
    h.supervisor.acquire().await.unwrap();
    transport
        .last_handle()
        .fail_next_send(TransportError::Rejected("not on network".into()));

    let err = h.supervisor.send_message("15550109999", "hello").await.unwrap_err();
    assert!(matches!(err, ChannelError::SendFailed { attempts: 1, .. }));
}

// ── Disconnect and liveness ─────────────────────────────────────────────

#[tokio::test]
async fn disconnect_logs_out_and_is_idempotent() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    let old = h.supervisor.acquire().await.unwrap();
    h.supervisor.disconnect().await;

    let handle = transport.last_handle();
    assert_eq!(handle.logouts(), 1);
    assert_eq!(handle.closes(), 1);
    assert!(!h.supervisor.is_healthy());
    assert_eq!(old.state(), SessionState::Closed);

    // Our own logout's 401 must not latch the supervisor.
    tokio::task::yield_now().await;
    let status = h.supervisor.status();
    assert_eq!(status.phase, ChannelPhase::Disconnected);
    assert!(!status.logged_out);

    h.supervisor.disconnect().await;
    assert_eq!(handle.logouts(), 1);

    let fresh = h.supervisor.acquire().await.unwrap();
    assert_ne!(fresh, old);
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn dropped_session_is_never_reused() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    let old = h.supervisor.acquire().await.unwrap();
    transport
        .last_handle()
        .drop_connection(DisconnectReason::ConnectionLost);
    assert!(!h.supervisor.is_healthy());

    let to = Recipient::parse("15550109999").unwrap();
    let err = old.send(&to, "hi").await.unwrap_err();
    assert_eq!(err, TransportError::Closed);

    let fresh = h.supervisor.acquire().await.unwrap();
    assert_ne!(fresh, old);
    assert_eq!(old.state(), SessionState::Closed);
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn auto_reconnect_after_recoverable_drop() {
    let transport = MockTransport::new();
    let h = Harness::with(transport.clone(), |b| b.auto_reconnect(true));

    h.supervisor.acquire().await.unwrap();
    transport
        .last_handle()
        .drop_connection(DisconnectReason::ConnectionLost);

    let sup = h.supervisor.clone();
    let t = transport.clone();
    eventually(|| t.opens() == 2 && sup.is_healthy()).await;
}

// ── Pairing and credentials ─────────────────────────────────────────────

#[tokio::test]
async fn pairing_code_is_visible_while_waiting() {
    let transport = MockTransport::scripted([Plan::PairAndWait("2@QRDATA".into())]);
    let h = Harness::new(transport.clone());

    let sup = h.supervisor.clone();
    let pending = tokio::spawn(async move { sup.acquire().await });

    let sup = h.supervisor.clone();
    eventually(|| sup.status().phase == ChannelPhase::AwaitingPairing).await;
    assert_eq!(h.supervisor.status().pairing_code.as_deref(), Some("2@QRDATA"));
    assert_eq!(h.pairing.codes(), vec!["2@QRDATA".to_string()]);

    transport.last_handle().emit(TransportEvent::Ready {
        identity: support::identity(),
    });
    let session = pending.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(h.supervisor.status().pairing_code, None);
}

#[tokio::test]
async fn rotated_credentials_are_persisted_and_reused() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());

    h.supervisor.acquire().await.unwrap();
    let material = Credentials(serde_json::json!({ "me": "15550001111", "keys": [1, 2, 3] }));
    transport
        .last_handle()
        .emit(TransportEvent::CredentialsChanged(material.clone()));

    let store = h.store.clone();
    eventually(|| store.snapshot().is_some()).await;
    assert_eq!(h.store.snapshot(), Some(material.clone()));

    h.supervisor.disconnect().await;
    h.supervisor.acquire().await.unwrap();
    assert_eq!(transport.seen_credentials(), vec![None, Some(material)]);
}

#[tokio::test]
async fn clear_credentials_wipes_the_store() {
    let transport = MockTransport::new();
    let h = Harness::new(transport.clone());
    h.supervisor.acquire().await.unwrap();
    transport.last_handle().emit(TransportEvent::CredentialsChanged(Credentials(
        serde_json::json!({ "me": "x" }),
    )));
    let store = h.store.clone();
    eventually(|| store.snapshot().is_some()).await;

    h.supervisor.clear_credentials().await.unwrap();
    assert!(h.store.snapshot().is_none());
    assert_eq!(h.observer.of_kind(StatusKind::CredentialsCleared).len(), 1);
}

// ── Shutdown ────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_cancels_in_flight_attempt() {
    let transport = MockTransport::scripted([Plan::Hang]);
    let h = Harness::new(transport.clone());

    let sup = h.supervisor.clone();
    let pending = tokio::spawn(async move { sup.acquire().await });
    let t = transport.clone();
    eventually(|| t.opens() == 1).await;

    h.supervisor.shutdown().await;

    assert_eq!(pending.await.unwrap().unwrap_err(), ChannelError::Shutdown);
    assert_eq!(transport.last_handle().closes(), 1);
    assert_eq!(h.supervisor.acquire().await.unwrap_err(), ChannelError::Shutdown);
}
