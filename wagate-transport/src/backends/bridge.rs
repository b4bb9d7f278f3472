// ABOUTME: Plumbing shared by the bridge-backed transports.
// ABOUTME: Request/reply correlation, the detachable event sink, and the cached probe.

use crate::event::{ConnectionUpdate, TransportEvent};
use crate::traits::{SendReceipt, SocketState, TransportProbe};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Reply = std::result::Result<Value, String>;

/// A frame received from a bridge: either a reply to a request or an event
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BridgeFrame {
    Reply { id: u64, outcome: Reply },
    Event { name: String, data: Value },
}

impl BridgeFrame {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let json: Value = serde_json::from_str(line).ok()?;
        if let Some(id) = json.get("reply").and_then(Value::as_u64) {
            let ok = json.get("ok").and_then(Value::as_bool).unwrap_or(false);
            let outcome = if ok {
                Ok(json.get("result").cloned().unwrap_or(Value::Null))
            } else {
                Err(json
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("bridge reported failure")
                    .to_string())
            };
            return Some(BridgeFrame::Reply { id, outcome });
        }
        let name = json.get("event")?.as_str()?.to_string();
        let data = json.get("data").cloned().unwrap_or(Value::Null);
        Some(BridgeFrame::Event { name, data })
    }
}

/// Shared state between an adapter and its reader/writer tasks
pub(crate) struct BridgeLink {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    probe: Mutex<TransportProbe>,
    request_timeout: Duration,
}

impl BridgeLink {
    pub(crate) fn new(request_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            events: Mutex::new(None),
            probe: Mutex::new(TransportProbe::closed()),
            request_timeout,
        }
    }

    pub(crate) fn attach(
        &self,
        outbound: mpsc::UnboundedSender<String>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        *lock(&self.outbound) = Some(outbound);
        *lock(&self.events) = Some(events);
    }

    pub(crate) fn is_attached(&self) -> bool {
        lock(&self.outbound).is_some()
    }

    /// Send a request and wait for its reply
    pub(crate) async fn request(&self, op: &str, args: Value) -> Result<Value> {
        self.request_with_timeout(op, args, self.request_timeout).await
    }

    pub(crate) async fn request_with_timeout(
        &self,
        op: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => bail!("Bridge request arguments must be an object, got {}", other),
        };
        frame.insert("id".to_string(), json!(id));
        frame.insert("op".to_string(), json!(op));
        let line = Value::Object(frame).to_string();

        let (tx, rx) = oneshot::channel();
        lock(&self.waiting).insert(id, tx);

        let sent = lock(&self.outbound)
            .as_ref()
            .map(|out| out.send(line).is_ok())
            .unwrap_or(false);
        if !sent {
            lock(&self.waiting).remove(&id);
            bail!("Bridge is not connected");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(anyhow!("Bridge {} failed: {}", op, message)),
            Ok(Err(_)) => Err(anyhow!("Bridge closed before replying to {}", op)),
            Err(_) => {
                lock(&self.waiting).remove(&id);
                Err(anyhow!("Bridge {} timed out after {:?}", op, timeout))
            }
        }
    }

    pub(crate) fn resolve(&self, id: u64, outcome: Reply) {
        match lock(&self.waiting).remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!(id, "Reply for unknown or expired bridge request"),
        }
    }

    /// Forward an event unless the adapter has been detached
    pub(crate) async fn emit(&self, event: TransportEvent) {
        if let TransportEvent::Connection(update) = &event {
            self.observe(update);
        }
        let sender = lock(&self.events).clone();
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                tracing::debug!("Transport event receiver dropped");
            }
        }
    }

    fn observe(&self, update: &ConnectionUpdate) {
        let mut probe = lock(&self.probe);
        match update {
            ConnectionUpdate::Connecting => probe.socket = SocketState::Connecting,
            ConnectionUpdate::Open { identity } => {
                probe.socket = SocketState::Open;
                if identity.is_some() {
                    probe.identity = identity.clone();
                }
            }
            ConnectionUpdate::Closed(_) => {
                probe.socket = SocketState::Closed;
                probe.identity = None;
            }
        }
    }

    pub(crate) fn cached_probe(&self) -> TransportProbe {
        lock(&self.probe).clone()
    }

    pub(crate) fn set_probe(&self, probe: TransportProbe) {
        *lock(&self.probe) = probe;
    }

    pub(crate) fn detach(&self) {
        lock(&self.events).take();
    }

    /// Tear down the link: drop the writer and fail every pending request
    pub(crate) fn shutdown(&self, reason: &str) {
        lock(&self.outbound).take();
        lock(&self.probe).socket = SocketState::Closed;
        let waiting: Vec<_> = lock(&self.waiting).drain().collect();
        for (_, tx) in waiting {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Extract a message id from a bridge send reply
pub(crate) fn receipt_from(result: &Value) -> SendReceipt {
    let message_id = result
        .get("messageId")
        .or_else(|| result.pointer("/key/id"))
        .or_else(|| result.pointer("/id/_serialized"))
        .or_else(|| result.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    SendReceipt { message_id }
}

pub(crate) fn expect_bool(result: &Value, field: &str) -> Result<bool> {
    result
        .get(field)
        .and_then(Value::as_bool)
        .or_else(|| result.as_bool())
        .with_context(|| format!("Bridge reply is missing boolean '{}'", field))
}
