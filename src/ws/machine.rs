//! Connection state machine
//!
//! Synchronous and clock-free: inputs are method calls, outputs are
//! [`Action`]s queued for the driver task to execute in order. Owning every
//! transition here keeps one authoritative attempt counter and lets the
//! lifecycle be tested without sockets or timers.
//!
//! Every socket gets a fresh generation number. Events carrying a stale
//! generation are ignored, which makes late callbacks from a replaced or
//! aborted socket harmless.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use crate::core::state::CLOSE_NORMAL;
use crate::core::{
    CloseEvent, ConnectionState, OutboundMessage, OutboundQueue, ReconnectDecision,
    ReconnectPolicy,
};
use crate::infrastructure::metrics::TransportMetrics;
use crate::log_ws;
use crate::ws::event::TransportEvent;
use crate::ws::heartbeat::Heartbeat;

/// Reason sent when `disconnect` is called without one
pub const DEFAULT_CLOSE_REASON: &str = "client disconnect";

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start a handshake and arm the connection timeout
    OpenSocket { generation: u64 },
    /// Send a close frame (or abandon the handshake) and await the close
    CloseSocket {
        generation: u64,
        code: u16,
        reason: String,
    },
    /// Drop the socket without a close handshake
    AbortSocket { generation: u64 },
    /// Write a frame on the socket of `generation`
    Transmit {
        generation: u64,
        message: OutboundMessage,
    },
    /// Arm the backoff timer
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    StartHeartbeat { interval: Duration },
    StopHeartbeat,
    /// Publish to observers
    Publish(TransportEvent),
}

/// Result of `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the open socket
    Sent,
    /// Held in the offline queue until the next open
    Queued,
    /// Discarded (queuing disabled)
    Dropped,
}

impl SendOutcome {
    /// True unless the frame was discarded
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Transport lifecycle state machine
#[derive(Debug)]
pub struct Machine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    heartbeat: Option<Heartbeat>,
    queue: OutboundQueue,
    metrics: Arc<TransportMetrics>,
    /// Reconnect attempts since the last open or manual connect
    attempts_so_far: u32,
    /// Generation of the current (or last) socket
    generation: u64,
    /// Set by `disconnect`, suppresses reconnect for this close
    manual_close: bool,
    /// Backoff timer armed and not yet fired
    reconnect_pending: bool,
    /// Give-up already reported for this failure streak
    gave_up: bool,
    /// Current socket reached `Open`
    connected: bool,
    /// Code and reason of a close frame awaiting the peer's answer
    pending_close: Option<(u16, String)>,
    error: Option<String>,
    actions: VecDeque<Action>,
}

impl Machine {
    pub fn new(
        policy: ReconnectPolicy,
        heartbeat: Option<Heartbeat>,
        queue_capacity: usize,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            state: ConnectionState::Uninstantiated,
            policy,
            heartbeat,
            queue: OutboundQueue::new(queue_capacity),
            metrics,
            attempts_so_far: 0,
            generation: 0,
            manual_close: false,
            reconnect_pending: false,
            gave_up: false,
            connected: false,
            pending_close: None,
            error: None,
            actions: VecDeque::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn attempts_so_far(&self) -> u32 {
        self.attempts_so_far
    }

    #[inline]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drain pending actions in emission order
    pub fn take_actions(&mut self) -> Vec<Action> {
        self.actions.drain(..).collect()
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    // ------------------------------------------------------------------
    // Caller inputs
    // ------------------------------------------------------------------

    /// Open a socket unless one is already connecting or open
    ///
    /// Resets the attempt counter and cancels any pending backoff, so a
    /// transport that gave up can be revived. A close still in progress is
    /// completed first: the old socket is abandoned and its close reported.
    pub fn connect(&mut self) {
        if self.state.is_active() {
            return;
        }
        if self.state == ConnectionState::Closing {
            let generation = self.generation;
            let (code, reason) = self
                .pending_close
                .take()
                .unwrap_or_else(|| (CLOSE_NORMAL, DEFAULT_CLOSE_REASON.to_string()));
            self.actions.push_back(Action::AbortSocket { generation });
            self.on_close(generation, CloseEvent::new(code, reason, false));
        }
        self.cancel_reconnect();
        self.attempts_so_far = 0;
        self.gave_up = false;
        self.manual_close = false;
        self.open_socket();
    }

    /// Close the socket; never triggers a reconnect
    pub fn disconnect(&mut self, code: Option<u16>, reason: Option<&str>) {
        self.cancel_reconnect();
        self.manual_close = true;

        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                if self.state.is_open() {
                    self.actions.push_back(Action::StopHeartbeat);
                }
                let code = code.unwrap_or(CLOSE_NORMAL);
                let reason = reason.unwrap_or(DEFAULT_CLOSE_REASON).to_string();
                self.set_state(ConnectionState::Closing);
                self.pending_close = Some((code, reason.clone()));
                self.actions.push_back(Action::CloseSocket {
                    generation: self.generation,
                    code,
                    reason,
                });
            }
            ConnectionState::Closing => {}
            ConnectionState::Uninstantiated | ConnectionState::Closed => {
                self.set_state(ConnectionState::Closed);
            }
        }
    }

    /// Submit a frame; never blocks
    pub fn send(&mut self, message: OutboundMessage) -> SendOutcome {
        if self.state.is_open() {
            self.transmit(message);
            return SendOutcome::Sent;
        }

        if self.queue.capacity() == 0 {
            self.metrics.record_dropped();
            log_ws!(Level::DEBUG, state = %self.state, "Message dropped, queuing disabled");
            return SendOutcome::Dropped;
        }

        if self.queue.push(message).is_some() {
            self.metrics.record_dropped();
            log_ws!(
                Level::WARN,
                capacity = self.queue.capacity(),
                "Offline queue full, dropped oldest message"
            );
        }
        self.metrics.record_queued();
        SendOutcome::Queued
    }

    /// Final teardown: cancel timers, drop the queue, close the socket
    pub fn shutdown(&mut self) {
        self.queue.clear();
        self.disconnect(None, Some("transport dropped"));
    }

    // ------------------------------------------------------------------
    // Driver inputs
    // ------------------------------------------------------------------

    /// Handshake completed for `generation`
    pub fn on_open(&mut self, generation: u64, protocol: Option<String>) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            return;
        }

        self.error = None;
        self.attempts_so_far = 0;
        self.gave_up = false;
        self.connected = true;
        self.metrics.record_connected();
        self.set_state(ConnectionState::Open);
        self.actions.push_back(Action::Publish(TransportEvent::Opened {
            protocol,
        }));

        if let Some(heartbeat) = &self.heartbeat {
            self.actions.push_back(Action::StartHeartbeat {
                interval: heartbeat.interval(),
            });
        }

        let queued: Vec<OutboundMessage> = self.queue.drain().collect();
        if !queued.is_empty() {
            log_ws!(Level::DEBUG, count = queued.len(), "Flushing offline queue");
        }
        for message in queued {
            self.transmit(message);
        }
    }

    /// Handshake did not finish within the connection timeout
    pub fn on_connect_timeout(&mut self, generation: u64) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            return;
        }
        self.actions.push_back(Action::AbortSocket { generation });
        self.on_error(generation, "connection timed out".to_string());
        self.on_close(generation, CloseEvent::abnormal("connection timeout"));
    }

    /// Socket-level fault; recorded, the close that follows drives recovery
    pub fn on_error(&mut self, generation: u64, error: String) {
        if generation != self.generation {
            return;
        }
        log_ws!(Level::WARN, generation, error = %error, "Connection error");
        self.actions
            .push_back(Action::Publish(TransportEvent::Error(error.clone())));
        self.error = Some(error);
    }

    /// Socket for `generation` is gone
    pub fn on_close(&mut self, generation: u64, event: CloseEvent) {
        if generation != self.generation
            || matches!(
                self.state,
                ConnectionState::Closed | ConnectionState::Uninstantiated
            )
        {
            return;
        }

        if self.state.is_open() {
            self.actions.push_back(Action::StopHeartbeat);
        }
        if std::mem::take(&mut self.connected) {
            self.metrics.record_disconnected();
        }
        self.pending_close = None;
        self.set_state(ConnectionState::Closed);
        log_ws!(
            Level::INFO,
            code = event.code,
            reason = %event.reason,
            clean = event.was_clean,
            "Connection closed"
        );
        self.actions
            .push_back(Action::Publish(TransportEvent::Closed(event.clone())));

        if self.manual_close {
            return;
        }

        match self.policy.decide(&event, self.attempts_so_far) {
            ReconnectDecision::Retry { attempt, delay } => {
                self.attempts_so_far = attempt;
                self.reconnect_pending = true;
                log_ws!(
                    Level::WARN,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.actions
                    .push_back(Action::ScheduleReconnect { attempt, delay });
                self.actions
                    .push_back(Action::Publish(TransportEvent::ReconnectScheduled {
                        attempt,
                        delay,
                    }));
            }
            ReconnectDecision::Exhausted { attempts } => {
                if !self.gave_up {
                    self.gave_up = true;
                    log_ws!(Level::ERROR, attempts, "Reconnect attempts exhausted, giving up");
                    self.actions
                        .push_back(Action::Publish(TransportEvent::GaveUp { attempts }));
                }
            }
            ReconnectDecision::Declined => {
                log_ws!(Level::INFO, code = event.code, "Reconnect declined by policy");
            }
        }
    }

    /// Backoff timer fired
    pub fn on_reconnect_due(&mut self) {
        if !self.reconnect_pending || self.state != ConnectionState::Closed {
            return;
        }
        self.reconnect_pending = false;
        self.metrics.record_reconnect_attempt();
        log_ws!(Level::INFO, attempt = self.attempts_so_far, "Reconnecting");
        self.open_socket();
    }

    /// Heartbeat period elapsed
    pub fn on_heartbeat(&mut self) {
        if !self.state.is_open() {
            return;
        }
        if let Some(message) = self.heartbeat.as_ref().map(|h| h.message().clone()) {
            self.transmit(message);
        }
    }

    /// A write on the socket of `generation` failed
    pub fn on_send_failed(&mut self, generation: u64, error: String) {
        if generation != self.generation {
            return;
        }
        self.error = Some(format!("send failed: {error}"));
        self.actions
            .push_back(Action::Publish(TransportEvent::Error(format!(
                "send failed: {error}"
            ))));
    }

    // ------------------------------------------------------------------

    fn open_socket(&mut self) {
        self.generation += 1;
        self.metrics.record_connection_attempt();
        self.set_state(ConnectionState::Connecting);
        self.actions.push_back(Action::OpenSocket {
            generation: self.generation,
        });
    }

    fn transmit(&mut self, message: OutboundMessage) {
        self.metrics.record_sent();
        self.actions.push_back(Action::Transmit {
            generation: self.generation,
            message,
        });
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.actions.push_back(Action::CancelReconnect);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        log_ws!(Level::INFO, from = %self.state, to = %state, "State transition");
        self.state = state;
        self.actions
            .push_back(Action::Publish(TransportEvent::StateChanged(state)));
    }
}
