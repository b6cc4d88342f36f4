//! Local WebSocket server for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use wsrelay::{Transport, TransportConfig, TransportEvent};

/// Per-connection server behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Echo every data frame
    Echo,
    /// Close the first connection with 1012 right after the handshake,
    /// echo on later ones
    RestartFirst,
}

pub struct TestServer {
    pub addr: SocketAddr,
    /// `(connection index, text)` for every text frame received
    pub inbox: mpsc::UnboundedReceiver<(usize, String)>,
    pub accepted: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let (accepted_c, closed_c) = (Arc::clone(&accepted), Arc::clone(&closed));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accepted_c.fetch_add(1, Ordering::SeqCst);
                let inbox_tx = inbox_tx.clone();
                let closed = Arc::clone(&closed_c);
                tokio::spawn(async move {
                    serve(stream, index, mode, inbox_tx).await;
                    closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            inbox,
            accepted,
            closed,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn recv(&mut self) -> (usize, String) {
        tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("server received nothing")
            .expect("server stopped")
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    index: usize,
    mode: Mode,
    inbox: mpsc::UnboundedSender<(usize, String)>,
) {
    // Select the first offered subprotocol, as most servers do
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let first = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .and_then(|offered| offered.split(',').next())
            .map(|p| p.trim().to_string());
        if let Some(protocol) = first {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&protocol).unwrap());
        }
        Ok(response)
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    if mode == Mode::RestartFirst && index == 0 {
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Restart,
                reason: "restarting".into(),
            }))
            .await;
        while let Some(Ok(_)) = ws.next().await {}
        return;
    }

    while let Some(Ok(frame)) = ws.next().await {
        match frame {
            Message::Text(text) => {
                let _ = inbox.send((index, text.as_str().to_string()));
                if ws.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Binary(data) => {
                if ws.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => {}
            _ => {}
        }
    }
}

/// Listener that accepts TCP connections and never answers the handshake
pub async fn silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Config for tests: no auto-connect, no heartbeat, fast retries
pub fn config(url: &str) -> TransportConfig {
    TransportConfig {
        should_connect: false,
        heartbeat_interval_ms: 0,
        reconnect_interval_ms: 50,
        max_reconnect_interval_ms: 200,
        connection_timeout_ms: 2_000,
        ..TransportConfig::new(url)
    }
}

/// Wait until an event matches `pred`, returning it
pub async fn wait_event<F>(
    events: &mut broadcast::Receiver<TransportEvent>,
    mut pred: F,
) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_open(transport: &Transport) {
    let mut state = transport.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.is_open()),
    )
    .await
    .expect("timed out waiting for open")
    .expect("state channel closed");
}

/// Poll `cond` until it holds
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
