//! Core transport types
//!
//! Plain data with no I/O:
//! - ConnectionState / CloseEvent: lifecycle
//! - ReconnectPolicy: backoff and give-up rules
//! - OutboundQueue: bounded offline buffer
//! - OutboundMessage / InboundMessage: frame payloads

pub mod message;
pub mod policy;
pub mod queue;
pub mod state;

pub use message::{InboundMessage, OutboundMessage};
pub use policy::{backoff_delay, CloseFilter, ReconnectDecision, ReconnectPolicy};
pub use queue::OutboundQueue;
pub use state::{CloseEvent, ConnectionState};
