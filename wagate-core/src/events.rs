// ABOUTME: Typed publish/subscribe channel for session events (qr, ready, message, status).
// ABOUTME: Handlers run synchronously on publish; streaming collaborators get a broadcast receiver.

use crate::message::InboundMessage;
use crate::qr::QrPayload;
use crate::runtime::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use wagate_transport::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Qr,
    Ready,
    Message,
    Status,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Qr => "qr",
            EventKind::Ready => "ready",
            EventKind::Message => "message",
            EventKind::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyInfo {
    pub transport: TransportKind,
    pub identity: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub state: ConnectionState,
    pub ready: bool,
    pub transport: Option<TransportKind>,
    pub reason: Option<String>,
    /// What triggered the update, e.g. "connection.update" or "force-logout"
    pub source: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Qr(Arc<QrPayload>),
    Ready(ReadyInfo),
    Message(Arc<InboundMessage>),
    Status(StatusUpdate),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Qr(_) => EventKind::Qr,
            SessionEvent::Ready(_) => EventKind::Ready,
            SessionEvent::Message(_) => EventKind::Message,
            SessionEvent::Status(_) => EventKind::Status,
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, EventKind, Handler)>,
}

/// Event hub shared by the supervisor and collaborators
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    handlers: Arc<Mutex<Handlers>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(Mutex::new(Handlers::default())),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = lock(&self.handlers)
            .entries
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in matching {
            handler(&event);
        }
        // No streaming receivers is normal
        let _ = self.sender.send(event);
    }

    /// Call `handler` for every event of `kind` until the subscription is dropped
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut handlers = lock(&self.handlers);
        handlers.next_id += 1;
        let id = handlers.next_id;
        handlers.entries.push((id, kind, Arc::new(handler)));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Receiver over every event, for streaming collaborators
    pub fn stream(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).entries.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Registration returned by [`EventBus::subscribe`]; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<Handlers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the handler registered for the life of the bus
    pub fn forget(mut self) {
        self.handlers = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            lock(&handlers).entries.retain(|(id, _, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
