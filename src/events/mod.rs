//! Event dispatcher - fans reader events out to registered consumers
//!
//! Events are produced by the transport and delivered on the session's
//! delivery task, never on the caller's task. Two consumption styles are
//! supported:
//! - callback handlers, invoked in transport order for their `EventKind`
//! - channel subscriptions, for consumers that want to pull events on their
//!   own task (e.g. a console loop that must not print from the delivery task)
//!
//! A failing or panicking handler is logged and counted; delivery to the
//! remaining handlers and of later events continues.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::ops::TagOpReport;
use crate::tags::TagReport;

/// Classes of asynchronous reader events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TagReported,
    TagOpComplete,
    ReaderStarted,
    ReaderStopped,
}

impl EventKind {
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::TagReported,
            EventKind::TagOpComplete,
            EventKind::ReaderStarted,
            EventKind::ReaderStopped,
        ]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::TagReported => write!(f, "tag_reported"),
            EventKind::TagOpComplete => write!(f, "tag_op_complete"),
            EventKind::ReaderStarted => write!(f, "reader_started"),
            EventKind::ReaderStopped => write!(f, "reader_stopped"),
        }
    }
}

/// Event as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    TagsReported(TagReport),
    /// Results already correlated to their originating sequences
    TagOpComplete(TagOpReport),
    ReaderStarted { at: DateTime<Utc> },
    ReaderStopped { at: DateTime<Utc> },
}

impl ReaderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReaderEvent::TagsReported(_) => EventKind::TagReported,
            ReaderEvent::TagOpComplete(_) => EventKind::TagOpComplete,
            ReaderEvent::ReaderStarted { .. } => EventKind::ReaderStarted,
            ReaderEvent::ReaderStopped { .. } => EventKind::ReaderStopped,
        }
    }
}

/// Callback invoked on the delivery task
///
/// Handlers touching state shared with the caller should lock it only long
/// enough to copy or append, and never perform I/O under that lock.
pub type EventHandler = Arc<dyn Fn(&ReaderEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Sink {
    Callback(EventHandler),
    Channel(mpsc::UnboundedSender<ReaderEvent>),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    sink: Sink,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events dispatched (counted once per event, not per handler)
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
}

/// Per-session registry of event consumers
pub struct EventDispatcher {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Register a callback for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ReaderEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(kind, Sink::Callback(Arc::new(handler)))
    }

    /// Register a channel for one event kind
    ///
    /// The subscription is released automatically once the receiver is dropped.
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(kind, Sink::Channel(tx)), rx)
    }

    fn add(&self, kind: EventKind, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .push(Subscription { id, kind, sink });
        debug!(?id, %kind, "Subscribed to reader events");
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Drop every subscription; channel receivers see their stream end
    pub fn clear(&self) {
        let released = {
            let mut subscriptions = self.subscriptions.write();
            std::mem::take(&mut *subscriptions).len()
        };
        if released > 0 {
            debug!("Released {} event subscriptions", released);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Deliver one event to every consumer of its kind, in registration order
    pub fn dispatch(&self, event: &ReaderEvent) {
        let kind = event.kind();

        // Snapshot so handlers run without holding the registry lock
        let targets: Vec<Subscription> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect();

        self.delivered.fetch_add(1, Ordering::Relaxed);
        if targets.is_empty() {
            trace!(%kind, "No subscribers for event");
            return;
        }

        let mut closed = Vec::new();
        for subscription in targets {
            match subscription.sink {
                Sink::Callback(handler) => {
                    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                        Ok(Ok(())) => {},
                        Ok(Err(e)) => {
                            self.handler_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(id = ?subscription.id, %kind, "Event handler failed: {:#}", e);
                        },
                        Err(_) => {
                            self.handler_failures.fetch_add(1, Ordering::Relaxed);
                            error!(id = ?subscription.id, %kind, "Event handler panicked");
                        },
                    }
                },
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(subscription.id);
                    }
                },
            }
        }

        if !closed.is_empty() {
            debug!("Dropping {} closed event channels", closed.len());
            self.subscriptions
                .write()
                .retain(|s| !closed.contains(&s.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{TagData, TagRead};
    use parking_lot::Mutex;

    fn report(epc: &str) -> ReaderEvent {
        ReaderEvent::TagsReported(TagReport::new(vec![TagRead::new(
            TagData::from_hex(epc).unwrap(),
        )]))
    }

    fn epcs(events: &[ReaderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ReaderEvent::TagsReported(r) => Some(r.tags[0].epc.to_hex()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_handlers_only_see_their_kind() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.subscribe(EventKind::ReaderStarted, move |e| {
            sink.lock().push(e.kind());
            Ok(())
        });

        dispatcher.dispatch(&report("01"));
        dispatcher.dispatch(&ReaderEvent::ReaderStarted { at: Utc::now() });

        assert_eq!(*seen.lock(), vec![EventKind::ReaderStarted]);
        assert_eq!(dispatcher.stats().delivered, 2);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.subscribe(EventKind::TagReported, |_| anyhow::bail!("display closed"));
        dispatcher.subscribe(EventKind::TagReported, |_| panic!("handler bug"));
        let sink = Arc::clone(&seen);
        dispatcher.subscribe(EventKind::TagReported, move |e| {
            sink.lock().push(e.clone());
            Ok(())
        });

        dispatcher.dispatch(&report("01"));
        dispatcher.dispatch(&report("02"));

        assert_eq!(epcs(&seen.lock()), vec!["01", "02"]);
        assert_eq!(dispatcher.stats().handler_failures, 4);
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let dispatcher = EventDispatcher::new();
        let a = dispatcher.subscribe(EventKind::TagReported, |_| Ok(()));
        let _b = dispatcher.subscribe(EventKind::TagReported, |_| Ok(()));
        assert_eq!(dispatcher.subscriber_count(EventKind::TagReported), 2);

        assert!(dispatcher.unsubscribe(a));
        assert!(!dispatcher.unsubscribe(a));
        assert_eq!(dispatcher.subscriber_count(EventKind::TagReported), 1);

        dispatcher.clear();
        assert_eq!(dispatcher.subscriber_count(EventKind::TagReported), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_preserves_order() {
        let dispatcher = EventDispatcher::new();
        let (_id, mut rx) = dispatcher.subscribe_channel(EventKind::TagReported);

        for epc in ["E1", "E2", "E3"] {
            dispatcher.dispatch(&report(epc));
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        assert_eq!(epcs(&received), vec!["E1", "E2", "E3"]);
    }

    #[test]
    fn test_dropped_receiver_unsubscribes() {
        let dispatcher = EventDispatcher::new();
        let (_id, rx) = dispatcher.subscribe_channel(EventKind::TagOpComplete);
        drop(rx);

        dispatcher.dispatch(&ReaderEvent::TagOpComplete(TagOpReport::default()));
        assert_eq!(dispatcher.subscriber_count(EventKind::TagOpComplete), 0);
    }
}
