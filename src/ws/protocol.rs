//! Notification server message conventions
//!
//! The server speaks JSON objects discriminated by `type`. These helpers
//! build the client requests it understands and name the reply topics, so
//! callers can `subscribe` to them on the transport. They are ordinary
//! messages: nothing here bypasses the queue or the registry.

use serde_json::{json, Value};

use crate::core::OutboundMessage;

/// Keep-alive request, answered with [`PONG`]
pub const PING: &str = "ping";
/// Keep-alive reply
pub const PONG: &str = "pong";
/// Greeting sent by the server after the handshake
pub const CONNECTION: &str = "connection";
/// Server-side topic subscription request
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
/// Reply to [`SUBSCRIBE`]
pub const SUBSCRIPTION_CONFIRMED: &str = "subscription_confirmed";
/// Reply to [`UNSUBSCRIBE`]
pub const UNSUBSCRIPTION_CONFIRMED: &str = "unsubscription_confirmed";
/// Direct message to another user
pub const MESSAGE: &str = "message";
/// Server error reply (e.g. unknown message type)
pub const ERROR: &str = "error";

// Push notifications
pub const NOTIFICATION: &str = "notification";
pub const SESSION_UPDATE: &str = "session_update";
pub const USER_STATUS: &str = "user_status";
pub const SYSTEM_ALERT: &str = "system_alert";
pub const USER_MESSAGE: &str = "user_message";

/// `{"type": <kind>, "payload": <payload>}`
pub fn typed(kind: &str, payload: Value) -> OutboundMessage {
    OutboundMessage::from(json!({ "type": kind, "payload": payload }))
}

/// Structured keep-alive
pub fn ping() -> OutboundMessage {
    OutboundMessage::from(json!({ "type": PING }))
}

/// Ask the server to route `topics` to this connection
pub fn subscribe<S: AsRef<str>>(topics: &[S]) -> OutboundMessage {
    topics_request(SUBSCRIBE, topics)
}

pub fn unsubscribe<S: AsRef<str>>(topics: &[S]) -> OutboundMessage {
    topics_request(UNSUBSCRIBE, topics)
}

/// Message for another connected user
pub fn direct_message(target_user: &str, content: Value) -> OutboundMessage {
    OutboundMessage::from(json!({
        "type": MESSAGE,
        "target_user": target_user,
        "content": content,
    }))
}

fn topics_request<S: AsRef<str>>(kind: &str, topics: &[S]) -> OutboundMessage {
    let topics: Vec<&str> = topics.iter().map(AsRef::as_ref).collect();
    OutboundMessage::from(json!({ "type": kind, "topics": topics }))
}
