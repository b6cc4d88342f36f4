//! Notifications published by a transport

use std::time::Duration;

use crate::core::{CloseEvent, ConnectionState, InboundMessage};

/// Observable transport event, delivered on the broadcast channel
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Lifecycle state changed
    StateChanged(ConnectionState),
    /// Socket opened; carries the negotiated subprotocol, if any
    Opened { protocol: Option<String> },
    /// Socket closed
    Closed(CloseEvent),
    /// Connection, timeout or send fault, recorded but not fatal
    Error(String),
    /// Reconnect attempt `attempt` will start after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted; `connect()` resumes
    GaveUp { attempts: u32 },
    /// Inbound data frame
    Message(InboundMessage),
}
