//! Subscriber registry.
//!
//! Application stores register a handler per topic (a conversation id,
//! [`GLOBAL_TOPIC`](pulse_core::frames::GLOBAL_TOPIC), or the
//! [`WILDCARD_TOPIC`] that sees every frame). Subscriptions are owned by
//! whoever registered them and outlive any session: `unsubscribe` is
//! idempotent and safe after the session has closed.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use pulse_core::frames::WILDCARD_TOPIC;
use pulse_core::{EventPayload, HandlerError, SubscriptionId};

/// Receives routed events.
///
/// Implemented for any `Fn(&EventPayload) -> Result<(), HandlerError>`.
pub trait EventHandler: Send + Sync {
    /// Handle one event. Errors are recorded by the dispatcher and do not
    /// affect other handlers.
    fn handle(&self, event: &EventPayload) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventPayload) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &EventPayload) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Returned by [`SubscriberRegistry::subscribe`]; pass it back to unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Unique id of the subscription.
    pub id: SubscriptionId,
    /// Topic it was registered on.
    pub topic: String,
}

struct Entry {
    id: SubscriptionId,
    topic: String,
    handler: Arc<dyn EventHandler>,
}

/// Topic → handler table, in registration order.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<H>(&self, topic: impl Into<String>, handler: H) -> SubscriptionHandle
    where
        H: EventHandler + 'static,
    {
        let handle = SubscriptionHandle {
            id: SubscriptionId::new(),
            topic: topic.into(),
        };
        self.entries.write().push(Entry {
            id: handle.id.clone(),
            topic: handle.topic.clone(),
            handler: Arc::new(handler),
        });
        debug!(subscription = %handle.id, topic = %handle.topic, "subscribed");
        handle
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != handle.id);
        let removed = entries.len() != before;
        if removed {
            debug!(subscription = %handle.id, topic = %handle.topic, "unsubscribed");
        }
        removed
    }

    /// Handlers interested in `topic`, in registration order.
    ///
    /// Returns owned handles so callers can invoke them without holding the
    /// registry lock (handlers may subscribe or unsubscribe re-entrantly).
    pub fn matching(&self, topic: &str) -> Vec<(SubscriptionId, Arc<dyn EventHandler>)> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.topic == topic || entry.topic == WILDCARD_TOPIC)
            .map(|entry| (entry.id.clone(), Arc::clone(&entry.handler)))
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of subscriptions on exactly `topic`.
    pub fn topic_count(&self, topic: &str) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.topic == topic)
            .count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
