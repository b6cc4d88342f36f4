//! Reconnecting transport
//!
//! [`Transport`] is a cheap, cloneable handle. All socket I/O and timers live
//! in one driver task that executes the [`Machine`]'s actions in order, so
//! lifecycle transitions never race each other. Handle calls lock the machine
//! briefly and wake the driver; they never block on the network.
//!
//! Subscriber handlers run synchronously on the driver task, in arrival
//! order, with no lock held.

use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Interval, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::Level;
use uuid::Uuid;

use crate::core::{CloseEvent, ConnectionState, InboundMessage, OutboundMessage, ReconnectPolicy};
use crate::infrastructure::config::TransportConfig;
use crate::infrastructure::metrics::{MetricsSnapshot, TransportMetrics};
use crate::log_ws;
use crate::ws::connection::{
    classify, close_frame, to_frame, Incoming, WebSocketConnection, WsSink, WsSource,
};
use crate::ws::event::TransportEvent;
use crate::ws::heartbeat::{self, Heartbeat};
use crate::ws::machine::{Action, Machine, SendOutcome};
use crate::ws::registry::{SubscriberRegistry, Subscription};
use crate::{Result, TransportError};

/// Buffered events per subscriber before the slowest one lags
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State shared between the handles and the driver task
struct Shared {
    machine: Mutex<Machine>,
    registry: SubscriberRegistry,
    metrics: Arc<TransportMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<TransportEvent>,
    last_message: Mutex<Option<InboundMessage>>,
    protocol: Mutex<Option<String>>,
    wake: Notify,
    shutdown: AtomicBool,
}

impl Shared {
    /// Run `f` against the machine, then wake the driver if work was queued
    fn with_machine<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        let (result, wake) = {
            let mut machine = self.machine.lock();
            let result = f(&mut machine);
            (result, machine.has_actions())
        };
        if wake {
            self.wake.notify_one();
        }
        result
    }
}

struct Inner {
    shared: Arc<Shared>,
    id: Uuid,
    url: String,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

/// Handle to a reconnecting WebSocket client
///
/// Clones share one connection. When the last clone is dropped the driver
/// cancels its timers, closes the socket and exits. Handlers must not own a
/// clone (the registry would keep the transport alive); capture a
/// [`WeakTransport`] from [`Transport::downgrade`] instead.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Non-owning handle, for use inside subscriber handlers
#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<Inner>,
}

impl WeakTransport {
    /// Owning handle, `None` once every `Transport` is gone
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

impl std::fmt::Debug for WeakTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakTransport")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Transport {
    /// Validate `config` and start the driver task
    ///
    /// Connects immediately when `should_connect` is set.
    /// # Errors
    /// Returns error on an invalid config or when called outside a tokio runtime.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let policy = ReconnectPolicy::from(&config);
        Self::with_policy(config, policy)
    }

    /// Like [`Transport::new`] with a caller-built reconnect policy
    ///
    /// Use this to install a close filter; the config's reconnect fields are
    /// ignored.
    pub fn with_policy(config: TransportConfig, policy: ReconnectPolicy) -> Result<Self> {
        let url = config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let metrics = Arc::new(TransportMetrics::new());
        let machine = Machine::new(
            policy,
            Heartbeat::from_config(&config),
            config.queue_capacity(),
            Arc::clone(&metrics),
        );
        let (state_tx, _) = watch::channel(ConnectionState::Uninstantiated);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            machine: Mutex::new(machine),
            registry: SubscriberRegistry::new(),
            metrics,
            state_tx,
            events_tx,
            last_message: Mutex::new(None),
            protocol: Mutex::new(None),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let id = Uuid::new_v4();
        let driver = Driver::new(
            id,
            Arc::clone(&shared),
            url.to_string(),
            config.protocols.clone(),
            config.connection_timeout(),
        );
        let handle = runtime.spawn(driver.run());

        log_ws!(Level::INFO, transport = %id, url = %url, "Transport created");

        let transport = Self {
            inner: Arc::new(Inner {
                shared,
                id,
                url: url.to_string(),
                driver: Mutex::new(Some(handle)),
            }),
        };
        if config.should_connect {
            transport.connect();
        }
        Ok(transport)
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Open the connection; no-op while connecting or open
    ///
    /// Resets the reconnect attempt count, so this also revives a transport
    /// that gave up.
    pub fn connect(&self) {
        self.shared().with_machine(Machine::connect);
    }

    /// Close the connection (default code 1000); suppresses reconnection
    /// until the next `connect`
    pub fn disconnect(&self, code: Option<u16>, reason: Option<&str>) {
        self.shared()
            .with_machine(|machine| machine.disconnect(code, reason));
    }

    /// Send now if open, otherwise queue (or drop when queuing is off)
    pub fn send(&self, message: impl Into<OutboundMessage>) -> SendOutcome {
        let message = message.into();
        self.shared().with_machine(|machine| machine.send(message))
    }

    /// Serialize `value` to JSON and send it as a text frame
    /// # Errors
    /// Returns error if serialization fails; nothing is sent then.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<SendOutcome> {
        let message = OutboundMessage::json(value)?;
        Ok(self.send(message))
    }

    /// Register `handler` for messages whose `type` is `topic`
    ///
    /// A handler that replies should capture [`Transport::downgrade`], not a
    /// clone; an owned clone keeps the connection alive after its owner
    /// drops it.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared().registry.subscribe(topic, handler)
    }

    /// Register `handler` for every inbound message
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared().registry.subscribe_all(handler)
    }

    /// Topics with at least one handler
    pub fn topic_count(&self) -> usize {
        self.shared().registry.topic_count()
    }

    /// Handlers registered for `topic`
    pub fn handler_count(&self, topic: &str) -> usize {
        self.shared().registry.handler_count(topic)
    }

    /// Handle that does not keep the transport alive
    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared().machine.lock().state()
    }

    /// State as published by the driver
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared().state_tx.subscribe()
    }

    /// Event stream; events emitted before this call are not replayed
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared().events_tx.subscribe()
    }

    /// Most recent fault, cleared when a socket opens
    pub fn last_error(&self) -> Option<String> {
        self.shared().machine.lock().error().map(str::to_owned)
    }

    pub fn last_message(&self) -> Option<InboundMessage> {
        self.shared().last_message.lock().clone()
    }

    /// Subprotocol negotiated on the most recent open
    pub fn protocol(&self) -> Option<String> {
        self.shared().protocol.lock().clone()
    }

    /// Frames waiting in the offline queue
    pub fn queued(&self) -> usize {
        self.shared().machine.lock().queued()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared().metrics.snapshot()
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Identifier carried by this transport's log records
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Close the socket, stop the driver and wait for it to exit
    ///
    /// Other clones stay usable as inert handles: sends queue and
    /// nothing is transmitted.
    pub async fn shutdown(&self) {
        self.shared().shutdown.store(true, Ordering::Release);
        self.shared().wake.notify_one();
        let handle = self.inner.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log_ws!(Level::ERROR, error = %e, "Transport driver failed");
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------

type Connecting = BoxFuture<'static, Result<WebSocketConnection>>;

/// Live socket halves
struct Socket {
    generation: u64,
    sink: WsSink,
    source: WsSource,
    /// Close frame received from the peer, reported once the stream ends
    close: Option<CloseEvent>,
    /// Our close frame is out; no further writes
    closing: bool,
}

/// Owns the socket and timers; the only task that touches the network
struct Driver {
    id: Uuid,
    shared: Arc<Shared>,
    url: String,
    protocols: Vec<String>,
    connect_timeout: Duration,
    connecting: Option<(u64, Connecting)>,
    connect_deadline: Option<Pin<Box<Sleep>>>,
    socket: Option<Socket>,
    close_deadline: Option<Pin<Box<Sleep>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
}

impl Driver {
    fn new(
        id: Uuid,
        shared: Arc<Shared>,
        url: String,
        protocols: Vec<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            id,
            shared,
            url,
            protocols,
            connect_timeout,
            connecting: None,
            connect_deadline: None,
            socket: None,
            close_deadline: None,
            reconnect_timer: None,
            heartbeat: None,
        }
    }

    async fn run(mut self) {
        log_ws!(Level::DEBUG, transport = %self.id, "Transport driver started");

        loop {
            self.process_actions().await;

            if self.shared.shutdown.load(Ordering::Acquire) {
                self.teardown().await;
                break;
            }

            tokio::select! {
                _ = self.shared.wake.notified() => {}
                (generation, result) = poll_connecting(&mut self.connecting) => {
                    self.handshake_finished(generation, result);
                }
                _ = poll_sleep(&mut self.connect_deadline) => {
                    self.connect_deadline = None;
                    if let Some((generation, _)) = self.connecting.take() {
                        self.shared
                            .with_machine(|machine| machine.on_connect_timeout(generation));
                    }
                }
                (generation, frame) = poll_socket(&mut self.socket) => {
                    self.frame_received(generation, frame);
                }
                _ = poll_sleep(&mut self.close_deadline) => {
                    self.close_deadline = None;
                    log_ws!(Level::WARN, "Close handshake timed out");
                    self.finish_socket(Some(CloseEvent::abnormal("close handshake timed out")));
                }
                _ = poll_sleep(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.shared.with_machine(Machine::on_reconnect_due);
                }
                _ = poll_interval(&mut self.heartbeat) => {
                    self.shared.with_machine(Machine::on_heartbeat);
                }
            }
        }

        log_ws!(Level::DEBUG, transport = %self.id, "Transport driver stopped");
    }

    /// Execute queued machine actions until none remain
    async fn process_actions(&mut self) {
        loop {
            let actions = self.shared.machine.lock().take_actions();
            if actions.is_empty() {
                break;
            }
            for action in actions {
                self.execute(action).await;
            }
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::OpenSocket { generation } => self.open_socket(generation),
            Action::CloseSocket {
                generation,
                code,
                reason,
            } => self.close_socket(generation, code, reason).await,
            Action::AbortSocket { generation } => {
                if self.connecting.as_ref().is_some_and(|(g, _)| *g == generation) {
                    self.connecting = None;
                    self.connect_deadline = None;
                }
                if self.socket.as_ref().is_some_and(|s| s.generation == generation) {
                    self.socket = None;
                    self.close_deadline = None;
                }
            }
            Action::Transmit {
                generation,
                message,
            } => self.transmit(generation, message).await,
            Action::ScheduleReconnect { attempt, delay } => {
                log_ws!(
                    Level::DEBUG,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect timer armed"
                );
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            Action::CancelReconnect => self.reconnect_timer = None,
            Action::StartHeartbeat { interval } => {
                self.heartbeat = Some(heartbeat::ticker(interval));
            }
            Action::StopHeartbeat => self.heartbeat = None,
            Action::Publish(event) => self.publish(event),
        }
    }

    fn open_socket(&mut self, generation: u64) {
        // A new socket replaces whatever was left of the previous one
        self.socket = None;
        self.close_deadline = None;

        let url = self.url.clone();
        let protocols = self.protocols.clone();
        log_ws!(Level::INFO, transport = %self.id, url = %url, generation, "Connecting");
        self.connecting = Some((
            generation,
            Box::pin(async move { WebSocketConnection::connect(&url, &protocols).await }),
        ));
        self.connect_deadline = Some(Box::pin(sleep(self.connect_timeout)));
    }

    async fn close_socket(&mut self, generation: u64, code: u16, reason: String) {
        if self.connecting.as_ref().is_some_and(|(g, _)| *g == generation) {
            // Handshake abandoned; there is no socket to send a frame on
            self.connecting = None;
            self.connect_deadline = None;
            self.shared.with_machine(|machine| {
                machine.on_close(generation, CloseEvent::new(code, reason, false))
            });
            return;
        }

        let Some(socket) = self
            .socket
            .as_mut()
            .filter(|socket| socket.generation == generation)
        else {
            self.shared.with_machine(|machine| {
                machine.on_close(generation, CloseEvent::new(code, reason, false))
            });
            return;
        };

        socket.closing = true;
        match socket.sink.send(close_frame(code, &reason)).await {
            Ok(()) => {
                log_ws!(Level::DEBUG, code, reason = %reason, "Close frame sent");
                self.close_deadline = Some(Box::pin(sleep(self.connect_timeout)));
            }
            Err(e) => {
                log_ws!(Level::WARN, error = %e, "Close frame failed");
                self.finish_socket(Some(CloseEvent::new(code, reason, false)));
            }
        }
    }

    async fn transmit(&mut self, generation: u64, message: OutboundMessage) {
        let result = match self
            .socket
            .as_mut()
            .filter(|socket| socket.generation == generation && !socket.closing)
        {
            Some(socket) => socket
                .sink
                .send(to_frame(message))
                .await
                .map_err(|e| e.to_string()),
            None => Err("socket not open".to_string()),
        };

        if let Err(error) = result {
            log_ws!(Level::WARN, generation, error = %error, "Send failed");
            self.shared
                .with_machine(|machine| machine.on_send_failed(generation, error));
        }
    }

    fn publish(&self, event: TransportEvent) {
        if let TransportEvent::StateChanged(state) = &event {
            self.shared.state_tx.send_replace(*state);
        }
        // No receivers is fine
        let _ = self.shared.events_tx.send(event);
    }

    fn handshake_finished(&mut self, generation: u64, result: Result<WebSocketConnection>) {
        self.connecting = None;
        self.connect_deadline = None;

        match result {
            Ok(connection) => {
                let protocol = connection.protocol().map(str::to_owned);
                log_ws!(
                    Level::INFO,
                    generation,
                    protocol = ?protocol,
                    "WebSocket connected"
                );
                *self.shared.protocol.lock() = protocol.clone();

                let (sink, source) = connection.into_split();
                self.socket = Some(Socket {
                    generation,
                    sink,
                    source,
                    close: None,
                    closing: false,
                });
                self.shared
                    .with_machine(|machine| machine.on_open(generation, protocol));
            }
            Err(e) => {
                let error = e.to_string();
                self.shared.with_machine(|machine| {
                    machine.on_error(generation, error.clone());
                    machine.on_close(generation, CloseEvent::abnormal(error));
                });
            }
        }
    }

    fn frame_received(
        &mut self,
        generation: u64,
        frame: Option<std::result::Result<Message, tungstenite::Error>>,
    ) {
        match frame {
            Some(Ok(frame)) => match classify(frame) {
                Incoming::Data(message) => self.deliver(message),
                Incoming::Close(event) => {
                    log_ws!(Level::DEBUG, code = event.code, "Close frame received");
                    // tungstenite answers the close; the stream ends after that
                    if let Some(socket) = self.socket.as_mut() {
                        if socket.close.is_none() {
                            socket.close = Some(event);
                        }
                    }
                }
                Incoming::Control => {}
            },
            Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
            | None => self.finish_socket(None),
            Some(Err(e)) => {
                let error = e.to_string();
                self.shared
                    .with_machine(|machine| machine.on_error(generation, error));
                self.finish_socket(None);
            }
        }
    }

    /// Route an inbound data frame to observers and handlers
    fn deliver(&self, message: InboundMessage) {
        self.shared.metrics.record_received();
        *self.shared.last_message.lock() = Some(message.clone());

        let report = self.shared.registry.dispatch(&message);
        log_ws!(
            Level::TRACE,
            topic = message.topic().unwrap_or("-"),
            delivered = report.delivered,
            panicked = report.panicked,
            "Message dispatched"
        );
        let _ = self
            .shared
            .events_tx
            .send(TransportEvent::Message(message));
    }

    /// Drop the socket and report its close
    ///
    /// `fallback` is used when the peer sent no close frame.
    fn finish_socket(&mut self, fallback: Option<CloseEvent>) {
        self.close_deadline = None;
        let Some(socket) = self.socket.take() else {
            return;
        };
        let generation = socket.generation;
        let event = socket
            .close
            .or(fallback)
            .unwrap_or_else(|| CloseEvent::abnormal("connection lost"));
        self.shared
            .with_machine(|machine| machine.on_close(generation, event));
    }

    /// Final close on drop or `shutdown`
    async fn teardown(&mut self) {
        self.shared.with_machine(Machine::shutdown);
        self.process_actions().await;

        // Best effort: the close frame is out, do not wait for the echo
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.sink.close().await;
            let generation = socket.generation;
            let event = socket
                .close
                .unwrap_or_else(|| CloseEvent::new(1000, "transport dropped", true));
            self.shared
                .with_machine(|machine| machine.on_close(generation, event));
            self.process_actions().await;
        }

        self.connecting = None;
        self.connect_deadline = None;
        self.close_deadline = None;
        self.reconnect_timer = None;
        self.heartbeat = None;
        self.shared.registry.clear();
    }
}

async fn poll_connecting(slot: &mut Option<(u64, Connecting)>) -> (u64, Result<WebSocketConnection>) {
    match slot {
        Some((generation, connecting)) => {
            let result = connecting.await;
            (*generation, result)
        }
        None => pending().await,
    }
}

async fn poll_socket(
    slot: &mut Option<Socket>,
) -> (u64, Option<std::result::Result<Message, tungstenite::Error>>) {
    match slot {
        Some(socket) => (socket.generation, socket.source.next().await),
        None => pending().await,
    }
}

async fn poll_sleep(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}

async fn poll_interval(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
