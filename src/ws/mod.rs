//! Reconnecting WebSocket client

pub mod connection;
pub mod event;
pub mod heartbeat;
pub mod machine;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use connection::WebSocketConnection;
pub use event::TransportEvent;
pub use heartbeat::Heartbeat;
pub use machine::{Action, Machine, SendOutcome};
pub use registry::{DispatchReport, HandlerId, SubscriberRegistry, Subscription};
pub use transport::{Transport, WeakTransport};
