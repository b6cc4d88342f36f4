//! Connection lifecycle states and close events
//!
//! Exactly one state is active per transport. `Closed` doubles as the
//! resting state between reconnect attempts and the terminal state after a
//! manual disconnect or give-up.

use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No `connect()` has ever been issued
    #[default]
    Uninstantiated,
    /// Socket handshake in progress
    Connecting,
    /// Socket open, frames flow both ways
    Open,
    /// Local close requested, waiting for the close handshake
    Closing,
    /// No socket
    Closed,
}

impl ConnectionState {
    /// Returns true if frames can be written right now
    #[inline(always)]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true while a socket exists or is being established
    #[inline(always)]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Stable lowercase name, used in log fields
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninstantiated => "uninstantiated",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure, never sent on the wire
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Description of a socket close, handed to the reconnect predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// True when the close handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Close without a handshake (network drop, timeout, refused connection)
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }
}
