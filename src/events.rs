//! Typed events emitted by the consumer and the listener registry that delivers them.
//!
//! Delivery is synchronous: [`EventBus::emit`] calls every listener registered for the
//! event's kind, in registration order, on the task that emitted it. A slow listener holds up
//! that task (the poll loop for lifecycle and batch events, a dispatch unit for per-message
//! events). Listeners that need to do real work should hand the event off, for example to a
//! channel.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    error::ConsumerError,
    message::{PullResponse, ReceivedMessage},
};

/// Everything observable about a running consumer.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// The consumer went from stopped to running
    Started,
    /// The poll loop has exited after a `stop()`
    Stopped,
    /// Every message of a non-empty batch has settled
    ResponseProcessed(Arc<PullResponse>),
    /// A pull returned no messages
    Empty,
    MessageReceived(Arc<ReceivedMessage>),
    /// The handler succeeded and acknowledgment was attempted
    MessageProcessed(Arc<ReceivedMessage>),
    PullingError(Arc<ConsumerError>),
    TimeoutError(Arc<ConsumerError>, Arc<ReceivedMessage>),
    ProcessingError(Arc<ConsumerError>, Arc<ReceivedMessage>),
    DeletingError(Arc<ConsumerError>, Arc<ReceivedMessage>),
}

/// The name of an event, used to register listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    Stopped,
    ResponseProcessed,
    Empty,
    MessageReceived,
    MessageProcessed,
    PullingError,
    TimeoutError,
    ProcessingError,
    DeletingError,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Started,
        EventKind::Stopped,
        EventKind::ResponseProcessed,
        EventKind::Empty,
        EventKind::MessageReceived,
        EventKind::MessageProcessed,
        EventKind::PullingError,
        EventKind::TimeoutError,
        EventKind::ProcessingError,
        EventKind::DeletingError,
    ];

    /// The event name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Stopped => "stopped",
            EventKind::ResponseProcessed => "responseProcessed",
            EventKind::Empty => "empty",
            EventKind::MessageReceived => "messageReceived",
            EventKind::MessageProcessed => "messageProcessed",
            EventKind::PullingError => "pullingError",
            EventKind::TimeoutError => "timeoutError",
            EventKind::ProcessingError => "processingError",
            EventKind::DeletingError => "deletingError",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConsumerEvent {
    /// The kind listeners are registered under
    pub fn kind(&self) -> EventKind {
        match self {
            ConsumerEvent::Started => EventKind::Started,
            ConsumerEvent::Stopped => EventKind::Stopped,
            ConsumerEvent::ResponseProcessed(_) => EventKind::ResponseProcessed,
            ConsumerEvent::Empty => EventKind::Empty,
            ConsumerEvent::MessageReceived(_) => EventKind::MessageReceived,
            ConsumerEvent::MessageProcessed(_) => EventKind::MessageProcessed,
            ConsumerEvent::PullingError(_) => EventKind::PullingError,
            ConsumerEvent::TimeoutError(..) => EventKind::TimeoutError,
            ConsumerEvent::ProcessingError(..) => EventKind::ProcessingError,
            ConsumerEvent::DeletingError(..) => EventKind::DeletingError,
        }
    }

    /// The error carried by the event, if it is one of the error events
    pub fn error(&self) -> Option<&ConsumerError> {
        match self {
            ConsumerEvent::PullingError(e)
            | ConsumerEvent::TimeoutError(e, _)
            | ConsumerEvent::ProcessingError(e, _)
            | ConsumerEvent::DeletingError(e, _) => Some(&**e),
            _ => None,
        }
    }

    /// The message the event is about, if any
    pub fn message(&self) -> Option<&ReceivedMessage> {
        match self {
            ConsumerEvent::MessageReceived(m)
            | ConsumerEvent::MessageProcessed(m)
            | ConsumerEvent::TimeoutError(_, m)
            | ConsumerEvent::ProcessingError(_, m)
            | ConsumerEvent::DeletingError(_, m) => Some(&**m),
            _ => None,
        }
    }
}

/// Handle returned on registration, used to remove a single listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = dyn Fn(&ConsumerEvent) + Send + Sync;

struct Listener {
    id: ListenerId,
    once: bool,
    callback: Arc<Callback>,
}

/// A registry of listeners keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every future event of `kind`
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(callback))
    }

    /// Register `callback` for the next event of `kind` only
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(callback))
    }

    /// Remove a single listener. Returns whether it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for registered in listeners.values_mut() {
            if let Some(pos) = registered.iter().position(|l| l.id == id) {
                registered.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every listener registered for `kind`
    pub fn remove_listeners(&self, kind: EventKind) {
        self.listeners.lock().remove(&kind);
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener of its kind.
    ///
    /// The registry lock is released before any callback runs, so listeners may register or
    /// remove listeners themselves. A panicking listener is logged and skipped.
    pub fn emit(&self, event: ConsumerEvent) {
        let kind = event.kind();

        let callbacks: Vec<Arc<Callback>> = {
            let mut listeners = self.listeners.lock();
            let Some(registered) = listeners.get_mut(&kind) else {
                return;
            };
            let callbacks = registered.iter().map(|l| Arc::clone(&l.callback)).collect();
            registered.retain(|l| !l.once);
            callbacks
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::error!(event = %kind, "event listener panicked");
            }
        }
    }

    fn register(&self, kind: EventKind, once: bool, callback: Arc<Callback>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Listener { id, once, callback });
        id
    }
}
