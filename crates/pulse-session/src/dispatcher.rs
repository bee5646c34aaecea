//! Event dispatcher.
//!
//! Decodes inbound text into [`InboundFrame`]s and fans each frame out to
//! the handlers registered for its topic. Delivery is synchronous and in
//! registration order; the caller dispatches one frame fully before the
//! next, so per-topic order equals arrival order.
//!
//! Handlers are isolated: an `Err` or a panic is recorded and logged, and
//! delivery continues with the next handler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use pulse_core::{HandlerError, InboundFrame};

use crate::registry::SubscriberRegistry;

/// Outcome of dispatching one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routing topic of the frame.
    pub topic: String,
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

/// Cumulative dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames dispatched.
    pub frames: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Failed handler invocations.
    pub failed: u64,
    /// Inbound texts dropped as malformed or unknown.
    pub dropped: u64,
}

/// Routes frames to subscribers.
pub struct EventDispatcher {
    registry: Arc<SubscriberRegistry>,
    frames: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl EventDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            frames: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// The registry this dispatcher routes through.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Decode one inbound text frame. Malformed and unknown frames are
    /// logged, counted, and dropped.
    pub fn decode(&self, text: &str) -> Option<InboundFrame> {
        match InboundFrame::decode(text) {
            Ok(frame) => Some(frame),
            Err(error) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%error, "dropping inbound frame");
                None
            }
        }
    }

    /// Deliver `frame` to every matching handler.
    pub fn dispatch(&self, frame: InboundFrame) -> DispatchReport {
        let topic = frame.routing_topic().to_owned();
        let handlers = self.registry.matching(&topic);
        let event = frame.into_payload();
        let _ = self.frames.fetch_add(1, Ordering::Relaxed);

        let mut report = DispatchReport {
            topic,
            delivered: 0,
            failed: 0,
        };
        for (id, handler) in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)))
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))));
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(subscription = %id, kind = %event.kind, topic = %report.topic, %error, "handler failed");
                }
            }
        }

        let _ = self
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        let _ = self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        debug!(kind = %event.kind, topic = %report.topic, delivered = report.delivered, failed = report.failed, "dispatched");
        report
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
