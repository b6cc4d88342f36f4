//! WebSocket socket setup and frame conversion
//!
//! Thin layer over tokio-tungstenite:
//! - Subprotocols offered via `Sec-WebSocket-Protocol`
//! - TCP_NODELAY on plain sockets (heartbeats and small frames go out
//!   immediately)
//! - Conversion between tungstenite frames and transport messages
//!
//! Deadlines are owned by the driver task, not by this module.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::core::{CloseEvent, InboundMessage, OutboundMessage};
use crate::{Result, TransportError};

/// Client socket stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half
pub type WsSink = SplitSink<WsStream, Message>;
/// Read half
pub type WsSource = SplitStream<WsStream>;

/// An established client socket
pub struct WebSocketConnection {
    stream: WsStream,
    url: String,
    /// Subprotocol selected by the server
    protocol: Option<String>,
}

impl WebSocketConnection {
    /// Perform the handshake against `url`, offering `protocols`
    pub async fn connect(url: &str, protocols: &[String]) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if !protocols.is_empty() {
            let offered = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|e| TransportError::InvalidUrl(format!("subprotocols: {e}")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        if let MaybeTlsStream::Plain(tcp) = stream.get_ref() {
            Self::optimize_tcp_stream(tcp)?;
        }

        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Ok(Self {
            stream,
            url: url.to_string(),
            protocol,
        })
    }

    /// Disable Nagle's algorithm
    fn optimize_tcp_stream(stream: &TcpStream) -> Result<()> {
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))
    }

    /// Negotiated subprotocol
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Split into independently polled write and read halves
    pub fn into_split(self) -> (WsSink, WsSource) {
        self.stream.split()
    }
}

/// Outbound message to wire frame
pub fn to_frame(message: OutboundMessage) -> Message {
    match message {
        OutboundMessage::Text(text) => Message::text(text),
        OutboundMessage::Binary(data) => Message::binary(data),
    }
}

/// Close frame carrying `code` and `reason`
pub fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    }))
}

/// What a received frame means to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Data frame for subscribers
    Data(InboundMessage),
    /// Peer started or answered the close handshake
    Close(CloseEvent),
    /// Ping/pong, answered by tungstenite
    Control,
}

/// Classify a received frame
pub fn classify(frame: Message) -> Incoming {
    match frame {
        Message::Text(text) => Incoming::Data(InboundMessage::from_text(text.as_str())),
        Message::Binary(data) => Incoming::Data(InboundMessage::from_binary(data)),
        Message::Close(Some(frame)) => Incoming::Close(CloseEvent::new(
            u16::from(frame.code),
            frame.reason.as_str(),
            true,
        )),
        Message::Close(None) => Incoming::Close(CloseEvent::new(
            crate::core::state::CLOSE_NORMAL,
            "",
            true,
        )),
        _ => Incoming::Control,
    }
}
