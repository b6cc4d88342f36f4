//! Topic subscriber registry
//!
//! Maps a topic to the handlers registered for it, in registration order.
//! Callers never hold the registry itself: `subscribe` hands back a
//! [`Subscription`] token with a weak reference that can only remove the
//! caller's own handler.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::Level;

use crate::core::InboundMessage;
use crate::log_ws;

/// Callback invoked with each message on a topic
pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Identity of one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

#[derive(Default)]
struct Registry {
    /// Handlers per topic, registration order
    topics: HashMap<String, Vec<(HandlerId, Handler)>>,
    /// Handlers receiving every message
    wildcard: Vec<(HandlerId, Handler)>,
    next_id: u64,
}

impl Registry {
    fn next_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    fn contains(&self, topic: Option<&str>, id: HandlerId) -> bool {
        let handlers = match topic {
            Some(topic) => self.topics.get(topic).map_or(&[][..], Vec::as_slice),
            None => self.wildcard.as_slice(),
        };
        handlers.iter().any(|(hid, _)| *hid == id)
    }

    fn remove(&mut self, topic: Option<&str>, id: HandlerId) -> bool {
        match topic {
            Some(topic) => {
                let Some(handlers) = self.topics.get_mut(topic) else {
                    return false;
                };
                let before = handlers.len();
                handlers.retain(|(hid, _)| *hid != id);
                let removed = handlers.len() != before;
                if handlers.is_empty() {
                    self.topics.remove(topic);
                }
                removed
            }
            None => {
                let before = self.wildcard.len();
                self.wildcard.retain(|(hid, _)| *hid != id);
                self.wildcard.len() != before
            }
        }
    }
}

/// Result of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned normally
    pub delivered: usize,
    /// Handlers that panicked
    pub panicked: usize,
}

/// Shared topic → handlers map owned by one transport
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages whose `type` is `topic`
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription::new(Arc::downgrade(&self.inner), Some(topic), id)
    }

    /// Register `handler` for every inbound message, typed or not
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.wildcard.push((id, Arc::new(handler)));

        Subscription::new(Arc::downgrade(&self.inner), None, id)
    }

    /// Invoke the handlers for `msg`
    ///
    /// Topic handlers run first in registration order, then wildcard
    /// handlers. The handler list is copied before any handler runs, so a
    /// handler may subscribe or unsubscribe without deadlocking. A panicking
    /// handler is logged and skipped.
    pub fn dispatch(&self, msg: &InboundMessage) -> DispatchReport {
        let handlers: Vec<Handler> = {
            let registry = self.inner.lock();
            let topic_handlers = msg
                .topic()
                .and_then(|topic| registry.topics.get(topic))
                .into_iter()
                .flatten();
            topic_handlers
                .chain(registry.wildcard.iter())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let mut report = DispatchReport::default();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.panicked += 1;
                    log_ws!(
                        Level::ERROR,
                        topic = msg.topic().unwrap_or("*"),
                        panic = panic_message(panic.as_ref()),
                        "Subscriber handler panicked"
                    );
                }
            }
        }
        report
    }

    /// Number of topics with at least one handler
    pub fn topic_count(&self) -> usize {
        self.inner.lock().topics.len()
    }

    /// Handlers registered for `topic`
    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Topics currently subscribed
    pub fn topics(&self) -> Vec<String> {
        self.inner.lock().topics.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        let registry = self.inner.lock();
        registry.topics.is_empty() && registry.wildcard.is_empty()
    }

    /// Drop every handler; outstanding tokens become inactive
    pub(crate) fn clear(&self) {
        let mut registry = self.inner.lock();
        registry.topics.clear();
        registry.wildcard.clear();
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("SubscriberRegistry")
            .field("topics", &registry.topics.len())
            .field("wildcard", &registry.wildcard.len())
            .finish()
    }
}

/// Deregistration capability for one handler
///
/// Dropping the token leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Option<String>,
    id: HandlerId,
    active: AtomicBool,
}

impl Subscription {
    fn new(registry: Weak<Mutex<Registry>>, topic: Option<String>, id: HandlerId) -> Self {
        Self {
            registry,
            topic,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Remove this handler; later calls and calls after the transport is
    /// gone do nothing. Returns true if a handler was removed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.lock().remove(self.topic.as_deref(), self.id),
            None => false,
        }
    }

    /// Topic, `None` for a wildcard subscription
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// True while the handler is still registered
    pub fn is_active(&self) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.lock().contains(self.topic.as_deref(), self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
