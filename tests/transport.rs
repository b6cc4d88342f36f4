//! End-to-end transport behaviour against a local WebSocket server

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{config, eventually, wait_event, wait_open, Mode, TestServer};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use wsrelay::ws::protocol;
use wsrelay::{ConnectionState, SendOutcome, Transport, TransportConfig, TransportEvent};

#[tokio::test]
async fn test_json_round_trip_reaches_topic_handler() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = transport.subscribe("ping", move |msg| {
        let _ = tx.send(msg.as_json().cloned());
    });

    transport.connect();
    wait_open(&transport).await;

    let outcome = transport.send(protocol::typed(protocol::PING, json!({"n": 1})));
    assert_eq!(outcome, SendOutcome::Sent);

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(payload["payload"]["n"], json!(1));

    let last = transport.last_message().unwrap();
    assert_eq!(last.topic(), Some("ping"));

    let metrics = transport.metrics();
    assert_eq!(metrics.messages_sent, 1);
    assert_eq!(metrics.messages_received, 1);
    assert_eq!(metrics.connection_attempts, 1);
    assert!(metrics.last_connected.is_some());
}

#[tokio::test]
async fn test_handlers_run_in_order_and_survive_panics() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s1 = Arc::clone(&seen);
    let _first = transport.subscribe("notification", move |_| s1.lock().unwrap().push("first"));
    let _boom = transport.subscribe("notification", |_| panic!("handler failure"));
    let s3 = Arc::clone(&seen);
    let _third = transport.subscribe("notification", move |_| s3.lock().unwrap().push("third"));
    let s4 = Arc::clone(&seen);
    let _all = transport.subscribe_all(move |_| s4.lock().unwrap().push("wildcard"));

    transport.connect();
    wait_open(&transport).await;
    assert_ok!(transport.send_json(&json!({"type": "notification", "payload": {}})));

    eventually(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(*seen.lock().unwrap(), vec!["first", "third", "wildcard"]);

    // Driver is still alive after the panic
    assert_ok!(transport.send_json(&json!({"type": "notification"})));
    eventually(|| seen.lock().unwrap().len() == 6).await;
}

#[tokio::test]
async fn test_unsubscribed_handler_is_not_called() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let removed_tx = tx.clone();
    let removed = transport.subscribe("alert", move |_| {
        let _ = removed_tx.send("removed");
    });
    let _kept = transport.subscribe("alert", move |_| {
        let _ = tx.send("kept");
    });
    assert!(removed.unsubscribe());
    assert!(!removed.unsubscribe());

    transport.connect();
    wait_open(&transport).await;
    transport.send(r#"{"type":"alert"}"#);

    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(got, Some("kept"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();

    transport.connect();
    transport.connect();
    assert_eq!(transport.state(), ConnectionState::Connecting);
    wait_open(&transport).await;
    transport.connect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(transport.metrics().connection_attempts, 1);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_manual_disconnect_is_terminal() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();
    let mut events = transport.events();

    transport.connect();
    wait_open(&transport).await;
    transport.disconnect(Some(1000), Some("bye"));
    assert_eq!(transport.state(), ConnectionState::Closing);

    let closed = wait_event(&mut events, |e| matches!(e, TransportEvent::Closed(_))).await;
    let TransportEvent::Closed(close) = closed else {
        unreachable!()
    };
    assert_eq!(close.code, 1000);
    assert!(close.was_clean);

    // Several reconnect intervals pass without a new socket
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(transport.metrics().reconnect_attempts, 0);
    assert!(transport.metrics().last_disconnected.is_some());

    // Sends while closed are queued, not sent
    assert_eq!(transport.send("later"), SendOutcome::Queued);
}

#[tokio::test]
async fn test_gives_up_once_then_connect_revives() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let cfg = TransportConfig {
        reconnect_interval_ms: 10,
        max_reconnect_interval_ms: 20,
        reconnect_attempts: 3,
        ..config(&format!("ws://{addr}"))
    };
    let transport = Transport::new(cfg).unwrap();
    let mut events = transport.events();

    transport.connect();

    let mut scheduled = Vec::new();
    let gave_up = wait_event(&mut events, |e| {
        if let TransportEvent::ReconnectScheduled { attempt, .. } = e {
            scheduled.push(*attempt);
        }
        matches!(e, TransportEvent::GaveUp { .. })
    })
    .await;
    assert_eq!(gave_up, TransportEvent::GaveUp { attempts: 3 });
    assert_eq!(scheduled, vec![1, 2, 3]);

    let metrics = transport.metrics();
    assert_eq!(metrics.connection_attempts, 4);
    assert_eq!(metrics.reconnect_attempts, 3);
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(transport.last_error().is_some());

    // Nothing else is scheduled after giving up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.metrics().connection_attempts, 4);

    // connect() resets the attempt budget
    transport.connect();
    let revived = wait_event(&mut events, |e| matches!(e, TransportEvent::GaveUp { .. })).await;
    assert_eq!(revived, TransportEvent::GaveUp { attempts: 3 });
    assert_eq!(transport.metrics().connection_attempts, 8);
}

#[tokio::test]
async fn test_handshake_timeout_counts_as_failed_attempt() {
    let addr = common::silent_listener().await;
    let cfg = TransportConfig {
        connection_timeout_ms: 100,
        reconnect_attempts: 1,
        ..config(&format!("ws://{addr}"))
    };
    let transport = Transport::new(cfg).unwrap();
    let mut events = transport.events();

    transport.connect();
    let error = wait_event(&mut events, |e| matches!(e, TransportEvent::Error(_))).await;
    assert_eq!(error, TransportEvent::Error("connection timed out".to_string()));

    let scheduled = wait_event(&mut events, |e| {
        matches!(e, TransportEvent::ReconnectScheduled { .. })
    })
    .await;
    assert!(matches!(
        scheduled,
        TransportEvent::ReconnectScheduled { attempt: 1, .. }
    ));

    let gave_up = wait_event(&mut events, |e| matches!(e, TransportEvent::GaveUp { .. })).await;
    assert_eq!(gave_up, TransportEvent::GaveUp { attempts: 1 });
    assert_eq!(transport.last_error().as_deref(), Some("connection timed out"));
    assert_eq!(transport.metrics().connection_attempts, 2);
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_connect_during_close_reports_previous_close() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();
    let mut events = transport.events();

    transport.connect();
    wait_open(&transport).await;
    transport.disconnect(None, None);
    transport.connect();

    let closed = wait_event(&mut events, |e| matches!(e, TransportEvent::Closed(_))).await;
    let TransportEvent::Closed(close) = closed else {
        unreachable!()
    };
    assert_eq!(close.code, 1000);
    wait_event(&mut events, |e| matches!(e, TransportEvent::Opened { .. })).await;

    assert_eq!(transport.state(), ConnectionState::Open);
    assert!(transport.metrics().last_disconnected.is_some());
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_replying_handler_does_not_outlive_owner() {
    let mut server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();

    let weak = transport.downgrade();
    let _sub = transport.subscribe("ping", move |_| {
        if let Some(transport) = weak.upgrade() {
            transport.send(r#"{"type":"pong"}"#);
        }
    });

    transport.connect();
    wait_open(&transport).await;
    transport.send(r#"{"type":"ping"}"#);
    assert_eq!(server.recv().await, (0, r#"{"type":"ping"}"#.to_string()));
    assert_eq!(server.recv().await, (0, r#"{"type":"pong"}"#.to_string()));

    drop(transport);
    eventually(|| server.closed.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_queue_flushes_in_order_on_open() {
    let mut server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();

    for text in ["a", "b", "c"] {
        assert_eq!(transport.send(text), SendOutcome::Queued);
    }
    assert_eq!(transport.queued(), 3);

    transport.connect();
    assert_eq!(server.recv().await, (0, "a".to_string()));
    assert_eq!(server.recv().await, (0, "b".to_string()));
    assert_eq!(server.recv().await, (0, "c".to_string()));
    assert_eq!(transport.queued(), 0);

    // Sends after open follow the flushed frames
    assert_eq!(transport.send("d"), SendOutcome::Sent);
    assert_eq!(server.recv().await, (0, "d".to_string()));
}

#[tokio::test]
async fn test_queue_disabled_drops() {
    let server = TestServer::spawn(Mode::Echo).await;
    let cfg = TransportConfig {
        queue_when_disconnected: false,
        ..config(&server.url())
    };
    let transport = Transport::new(cfg).unwrap();

    assert_eq!(transport.send("lost"), SendOutcome::Dropped);
    assert_eq!(transport.queued(), 0);
    assert_eq!(transport.metrics().messages_dropped, 1);
}

#[tokio::test]
async fn test_reconnects_after_server_close_and_flushes() {
    let mut server = TestServer::spawn(Mode::RestartFirst).await;
    let cfg = TransportConfig {
        reconnect_interval_ms: 300,
        max_reconnect_interval_ms: 300,
        ..config(&server.url())
    };
    let transport = Transport::new(cfg).unwrap();
    let mut events = transport.events();

    transport.connect();
    let closed = wait_event(&mut events, |e| matches!(e, TransportEvent::Closed(_))).await;
    assert_eq!(
        closed,
        TransportEvent::Closed(wsrelay::CloseEvent::new(1012, "restarting", true))
    );

    assert_eq!(transport.send("while-down"), SendOutcome::Queued);
    wait_event(&mut events, |e| matches!(e, TransportEvent::Opened { .. })).await;

    assert_eq!(server.recv().await, (1, "while-down".to_string()));
    let metrics = transport.metrics();
    assert_eq!(metrics.reconnect_attempts, 1);
    assert_eq!(metrics.connection_attempts, 2);
}

#[tokio::test]
async fn test_close_filter_declines_reconnect() {
    let server = TestServer::spawn(Mode::RestartFirst).await;
    let cfg = config(&server.url());
    let policy = wsrelay::ReconnectPolicy::from(&cfg).with_close_filter(|close| close.code != 1012);
    let transport = Transport::with_policy(cfg, policy).unwrap();
    let mut events = transport.events();

    transport.connect();
    wait_event(&mut events, |e| matches!(e, TransportEvent::Closed(_))).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subprotocol_negotiated() {
    let server = TestServer::spawn(Mode::Echo).await;
    let cfg = TransportConfig {
        protocols: vec!["notify.v1".to_string(), "chat".to_string()],
        ..config(&server.url())
    };
    let transport = Transport::new(cfg).unwrap();
    let mut events = transport.events();

    transport.connect();
    let opened = wait_event(&mut events, |e| matches!(e, TransportEvent::Opened { .. })).await;
    assert_eq!(
        opened,
        TransportEvent::Opened {
            protocol: Some("notify.v1".to_string())
        }
    );
    assert_eq!(transport.protocol().as_deref(), Some("notify.v1"));
}

#[tokio::test]
async fn test_heartbeat_sent_while_open() {
    let mut server = TestServer::spawn(Mode::Echo).await;
    let cfg = TransportConfig {
        heartbeat_interval_ms: 50,
        heartbeat_message: r#"{"type":"ping"}"#.to_string(),
        ..config(&server.url())
    };
    let transport = Transport::new(cfg).unwrap();

    transport.connect();
    let (_, first) = server.recv().await;
    let (_, second) = server.recv().await;
    assert_eq!(first, r#"{"type":"ping"}"#);
    assert_eq!(second, first);
    assert!(transport.metrics().messages_sent >= 2);
}

#[tokio::test]
async fn test_drop_closes_socket() {
    let server = TestServer::spawn(Mode::Echo).await;
    let transport = Transport::new(config(&server.url())).unwrap();
    transport.connect();
    wait_open(&transport).await;

    drop(transport);
    eventually(|| server.closed.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    assert_err!(Transport::new(TransportConfig::new("not a url")));
    assert_err!(Transport::new(TransportConfig {
        backoff_multiplier: 0.5,
        ..TransportConfig::new("ws://127.0.0.1:1")
    }));
}
