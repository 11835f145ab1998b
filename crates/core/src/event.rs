//! Event bus: decoupled, synchronous publish/subscribe.
//!
//! The task loop publishes [`Event`]s; presentation layers (a terminal, a
//! web view, a log) subscribe by [`EventKind`]. Delivery happens inline on
//! the publisher's task, in registration order, and returns only when every
//! matching handler has run. A handler that returns an error or panics is
//! logged and skipped; it never stops delivery to later handlers and never
//! reaches the loop.
//!
//! Handlers must not block. Consumers that need to do slow or async work
//! should use [`EventBus::forward`], which hands events to a bounded channel
//! without ever waiting on the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

use crate::task::{FailureKind, TaskId};

/// The kinds of event the engine publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepStarted,
    ThinkingStarted,
    ThinkingEnded,
    ToolStarted,
    ToolEnded,
    StreamFragment,
    TaskCompleted,
    TaskFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::StepStarted,
        Self::ThinkingStarted,
        Self::ThinkingEnded,
        Self::ToolStarted,
        Self::ToolEnded,
        Self::StreamFragment,
        Self::TaskCompleted,
        Self::TaskFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepStarted => "step_started",
            Self::ThinkingStarted => "thinking_started",
            Self::ThinkingEnded => "thinking_ended",
            Self::ToolStarted => "tool_started",
            Self::ToolEnded => "tool_ended",
            Self::StreamFragment => "stream_fragment",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A Thinking cycle is about to begin.
    StepStarted { step: usize, max_iterations: usize },

    /// The model call for this step has been sent.
    ThinkingStarted { step: usize },

    /// The model response for this step is fully assembled.
    ThinkingEnded { step: usize },

    /// A tool is about to run.
    ToolStarted {
        step: usize,
        tool: String,
        arguments: serde_json::Value,
    },

    /// A tool finished (successfully or not).
    ToolEnded {
        step: usize,
        tool: String,
        success: bool,
        duration_ms: u64,
        output: String,
    },

    /// An incremental text fragment from the model.
    StreamFragment { step: usize, content: String },

    /// The model produced a final answer.
    TaskCompleted { answer: String, iterations: usize },

    /// The task ended on a non-recoverable condition.
    TaskFailed { kind: FailureKind, message: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StepStarted { .. } => EventKind::StepStarted,
            Self::ThinkingStarted { .. } => EventKind::ThinkingStarted,
            Self::ThinkingEnded { .. } => EventKind::ThinkingEnded,
            Self::ToolStarted { .. } => EventKind::ToolStarted,
            Self::ToolEnded { .. } => EventKind::ToolEnded,
            Self::StreamFragment { .. } => EventKind::StreamFragment,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskFailed { .. } => EventKind::TaskFailed,
        }
    }
}

/// A published event: which task, when, and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(task_id: TaskId, payload: EventPayload) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Error type handlers may return. Logged by the bus, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber to the event bus.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}

/// Identifies a subscription so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    handler: Arc<dyn EventHandler>,
}

/// A synchronous, in-process event bus.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for one or more event kinds.
    pub fn on<F>(&self, kinds: impl IntoIterator<Item = EventKind>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(kinds, Arc::new(FnHandler(handler)))
    }

    /// Register a closure for every event kind.
    pub fn on_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on(EventKind::ALL, handler)
    }

    /// Register a handler object for one or more event kinds.
    pub fn subscribe(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut kinds: Vec<EventKind> = kinds.into_iter().collect();
        kinds.dedup();
        self.write().push(Subscription { id, kinds, handler });
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver an event to every matching handler, in registration order.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        // Handlers run without the lock held so they may (un)subscribe.
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .read()
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event = %kind, error = %e, "Event handler failed"),
                Err(_) => warn!(event = %kind, "Event handler panicked"),
            }
        }
        delivered
    }

    /// Bridge events into a bounded channel for async consumers.
    ///
    /// Uses `try_send`: when the consumer lags and the channel is full the
    /// event is dropped (and logged) rather than blocking the publisher.
    pub fn forward(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
        capacity: usize,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.on(kinds, move |event| {
            match tx.try_send(event.clone()) {
                Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = %event.kind(), "Forwarding channel full, dropping event");
                }
            }
            Ok(())
        });
        rx
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn fragment(text: &str) -> Event {
        Event::new(
            TaskId::new(),
            EventPayload::StreamFragment {
                step: 1,
                content: text.into(),
            },
        )
    }

    fn completed() -> Event {
        Event::new(
            TaskId::new(),
            EventPayload::TaskCompleted {
                answer: "42".into(),
                iterations: 1,
            },
        )
    }

    #[test]
    fn delivers_only_matching_kinds() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on([EventKind::StreamFragment], move |e| {
            sink.lock().unwrap().push(e.kind());
            Ok(())
        });

        bus.emit(&fragment("a"));
        bus.emit(&completed());

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::StreamFragment]);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.on_all(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        assert_eq!(bus.emit(&completed()), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.on_all(|_| Err("presentation layer exploded".into()));
        bus.on_all(|_| panic!("handler bug"));
        let flag = Arc::clone(&reached);
        bus.on_all(move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let delivered = bus.emit(&completed());
        assert_eq!(delivered, 1);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn no_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(&completed()), 0);
    }

    #[test]
    fn events_before_subscription_are_not_replayed() {
        let bus = EventBus::new();
        bus.emit(&fragment("early"));

        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        bus.on([EventKind::StreamFragment], move |_| {
            *c.lock().unwrap() += 1;
            Ok(())
        });
        bus.emit(&fragment("late"));

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let id = bus.on_all(|_| Ok(()));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.emit(&completed()), 0);
    }

    #[tokio::test]
    async fn forward_drops_when_full_instead_of_blocking() {
        let bus = EventBus::new();
        let mut rx = bus.forward([EventKind::StreamFragment], 2);

        for text in ["a", "b", "c", "d"] {
            bus.emit(&fragment(text));
        }

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EventPayload::StreamFragment { content, .. } = event.payload {
                received.push(content);
            }
        }
        assert_eq!(received, vec!["a", "b"]);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_string(&fragment("hi").payload).unwrap();
        assert!(json.contains(r#""type":"stream_fragment""#));
        assert!(json.contains(r#""content":"hi""#));
    }
}
