//! Transport metrics
//!
//! Lock-free counters updated by the state machine and the driver task.
//! Purely observational: nothing here feeds back into control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use time::OffsetDateTime;

/// Counters and timestamps for one transport
#[derive(Debug)]
pub struct TransportMetrics {
    /// Sockets opened (initial connects and reconnects)
    connection_attempts: AtomicU64,
    /// Sockets opened by the reconnect timer
    reconnect_attempts: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    /// Frames accepted into the offline queue
    messages_queued: AtomicU64,
    /// Frames discarded (queue overflow or queuing disabled)
    messages_dropped: AtomicU64,
    /// Frames received since the last open
    received_since_connect: AtomicU64,
    /// Unix millis of last open, 0 = never
    last_connected_ms: AtomicU64,
    /// Unix millis of last close, 0 = never
    last_disconnected_ms: AtomicU64,
    /// Monotonic open time while connected
    connected_since: Mutex<Option<Instant>>,
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub reconnect_attempts: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub last_connected: Option<OffsetDateTime>,
    pub last_disconnected: Option<OffsetDateTime>,
    /// Time since the last open, zero while disconnected
    pub uptime: Duration,
    /// Received frames per second since the last open
    pub message_rate: f64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            received_since_connect: AtomicU64::new(0),
            last_connected_ms: AtomicU64::new(0),
            last_disconnected_ms: AtomicU64::new(0),
            connected_since: Mutex::new(None),
        }
    }

    #[inline]
    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.received_since_connect.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the socket open
    pub fn record_connected(&self) {
        self.last_connected_ms.store(unix_millis(), Ordering::Relaxed);
        self.received_since_connect.store(0, Ordering::Relaxed);
        *self.connected_since.lock() = Some(Instant::now());
    }

    /// Mark the socket closed
    pub fn record_disconnected(&self) {
        self.last_disconnected_ms.store(unix_millis(), Ordering::Relaxed);
        *self.connected_since.lock() = None;
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.load(Ordering::Relaxed)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let connected_since = *self.connected_since.lock();
        let uptime = connected_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        let since_connect = self.received_since_connect.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();
        let message_rate = if secs > 0.0 {
            since_connect as f64 / secs
        } else {
            0.0
        };

        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            last_connected: to_datetime(self.last_connected_ms.load(Ordering::Relaxed)),
            last_disconnected: to_datetime(self.last_disconnected_ms.load(Ordering::Relaxed)),
            uptime,
            message_rate,
        }
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn to_datetime(millis: u64) -> Option<OffsetDateTime> {
    if millis == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}
