//! Application-level heartbeat
//!
//! While the socket is open a fixed payload is sent on a fixed period.
//! The heartbeat never decides connection health: a failed heartbeat is
//! recorded like any failed send and dead sockets surface through their own
//! close/error events.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::core::OutboundMessage;
use crate::infrastructure::config::TransportConfig;

/// Heartbeat settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    interval: Duration,
    message: OutboundMessage,
}

impl Heartbeat {
    /// Create heartbeat; a zero interval disables it
    pub fn new(interval: Duration, message: impl Into<OutboundMessage>) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        Some(Self {
            interval,
            message: message.into(),
        })
    }

    /// Heartbeat described by a config, `None` when disabled
    pub fn from_config(config: &TransportConfig) -> Option<Self> {
        config
            .heartbeat_interval()
            .and_then(|interval| Self::new(interval, config.heartbeat_message.as_str()))
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Payload sent on each tick
    #[inline]
    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }
}

/// Ticker whose first tick fires one period after the socket opens
///
/// Missed ticks are delayed rather than burst, so a stalled runtime does not
/// flood the socket with catch-up heartbeats.
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
