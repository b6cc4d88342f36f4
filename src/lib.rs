//! Reconnecting WebSocket client transport
//!
//! A [`Transport`] keeps one client connection alive: capped exponential
//! backoff on unexpected closes, a bounded queue for frames sent while
//! offline, an optional heartbeat, and topic-based dispatch of inbound JSON
//! messages to subscribers.
//!
//! ```no_run
//! # async fn run() -> wsrelay::Result<()> {
//! use wsrelay::{Transport, TransportConfig};
//!
//! let transport = Transport::new(TransportConfig::new("ws://127.0.0.1:8000/ws"))?;
//! let _alerts = transport.subscribe("system_alert", |msg| {
//!     println!("alert: {:?}", msg.as_json());
//! });
//! transport.send(wsrelay::ws::protocol::subscribe(&["system_alert"]));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod infrastructure;
pub mod ws;

pub use crate::core::{CloseEvent, ConnectionState, InboundMessage, OutboundMessage, ReconnectPolicy};
pub use infrastructure::config::{ConfigError, TransportConfig};
pub use infrastructure::metrics::MetricsSnapshot;
pub use ws::{SendOutcome, Subscription, Transport, TransportEvent, WeakTransport};

use thiserror::Error;

/// Main error type for the transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport must be created inside a tokio runtime")]
    NoRuntime,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TransportError>;
