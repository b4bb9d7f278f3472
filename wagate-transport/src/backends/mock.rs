// ABOUTME: Mock transport for testing - scriptable connects, sends, probes and events.
// ABOUTME: Allows deterministic session tests without a bridge process or network.
//!
//! # Example
//!
//! ```no_run
//! use wagate_transport::backends::mock::MockControl;
//! use wagate_transport::{TransportAdapter, TransportKind};
//!
//! # async fn example() {
//! let control = MockControl::new();
//! control.fail_next_sends(1, "socket hang up");
//!
//! let adapter = control.adapter(TransportKind::MultiDevice);
//! let _events = adapter.connect(std::path::Path::new("/tmp/creds")).await.unwrap();
//! control.open("5511999999999@s.whatsapp.net");
//!
//! assert!(adapter.send_text("1@s.whatsapp.net", "hi").await.is_err());
//! assert!(adapter.send_text("1@s.whatsapp.net", "hi").await.is_ok());
//! assert_eq!(control.send_attempts(), 2);
//! # }
//! ```

use crate::event::{CloseInfo, ConnectionUpdate, EventStream, TransportEvent};
use crate::kind::TransportKind;
use crate::payload::InboundPayload;
use crate::traits::{MediaUpload, SendReceipt, SocketState, TransportAdapter, TransportProbe};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A message the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub transport: TransportKind,
    pub to: String,
    pub body: Option<String>,
    pub media: Option<MediaUpload>,
}

#[derive(Default)]
struct MockState {
    next_adapter: AtomicU64,
    connects: AtomicUsize,
    closes: AtomicUsize,
    logouts: AtomicUsize,
    detaches: AtomicUsize,
    send_attempts: AtomicUsize,
    logout_fails: AtomicBool,
    connect_delay: Mutex<Duration>,
    connect_failures: Mutex<Vec<(TransportKind, String)>>,
    send_failures: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<SentMessage>>,
    credential_dirs: Mutex<Vec<PathBuf>>,
    probe: Mutex<Option<TransportProbe>>,
    registered: Mutex<HashSet<String>>,
    current: Mutex<Option<(u64, mpsc::Sender<TransportEvent>)>>,
}

/// Shared handle that scripts and observes every adapter it creates
#[derive(Clone, Default)]
pub struct MockControl {
    state: Arc<MockState>,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new adapter of the given kind bound to this control
    pub fn adapter(&self, kind: TransportKind) -> Arc<dyn TransportAdapter> {
        let id = self.state.next_adapter.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(MockTransport {
            id,
            kind,
            state: Arc::clone(&self.state),
        })
    }

    /// Factory function for the registry
    pub fn factory(&self, kind: TransportKind) -> crate::registry::TransportFactory {
        let control = self.clone();
        Box::new(move |_config| Ok(control.adapter(kind)))
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Make every connect of `kind` fail with `message`
    pub fn fail_connect(&self, kind: TransportKind, message: &str) {
        lock(&self.state.connect_failures).push((kind, message.to_string()));
    }

    pub fn clear_connect_failures(&self) {
        lock(&self.state.connect_failures).clear();
    }

    /// Delay every connect, to let concurrent callers overlap
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.state.connect_delay) = delay;
    }

    /// Fail the next `count` sends with `message`
    pub fn fail_next_sends(&self, count: usize, message: &str) {
        let mut failures = lock(&self.state.send_failures);
        for _ in 0..count {
            failures.push_back(message.to_string());
        }
    }

    pub fn fail_logout(&self, fail: bool) {
        self.state.logout_fails.store(fail, Ordering::SeqCst);
    }

    /// Override the probe result; `None` returns to tracking connection events
    pub fn set_probe(&self, probe: Option<TransportProbe>) {
        *lock(&self.state.probe) = probe;
    }

    pub fn register_number(&self, number: &str) {
        lock(&self.state.registered).insert(number.to_string());
    }

    // -------------------------------------------------------------------------
    // Event emission (to the most recent connection)
    // -------------------------------------------------------------------------

    /// Deliver an event on the current connection; false if nobody is listening
    pub fn emit(&self, event: TransportEvent) -> bool {
        let current = lock(&self.state.current).as_ref().map(|(_, tx)| tx.clone());
        match current {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn open(&self, identity: &str) -> bool {
        self.set_probe(Some(TransportProbe::new(SocketState::Open, Some(identity.to_string()))));
        self.emit(TransportEvent::Connection(ConnectionUpdate::Open {
            identity: Some(identity.to_string()),
        }))
    }

    pub fn close(&self, info: CloseInfo) -> bool {
        self.set_probe(Some(TransportProbe::closed()));
        self.emit(TransportEvent::Connection(ConnectionUpdate::Closed(info)))
    }

    pub fn pairing_code(&self, code: &str) -> bool {
        self.emit(TransportEvent::PairingCode(code.to_string()))
    }

    pub fn inbound(&self, payload: InboundPayload) -> bool {
        self.emit(TransportEvent::Inbound(payload))
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.state.detaches.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state.sent).clone()
    }

    /// Credential directories passed to connect, in order
    pub fn credential_dirs(&self) -> Vec<PathBuf> {
        lock(&self.state.credential_dirs).clone()
    }
}

/// Mock adapter created by [`MockControl`]
pub struct MockTransport {
    id: u64,
    kind: TransportKind,
    state: Arc<MockState>,
}

impl MockTransport {
    fn next_send(&self) -> Result<SendReceipt> {
        self.state.send_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.state.send_failures).pop_front() {
            return Err(anyhow!(message));
        }
        Ok(SendReceipt {
            message_id: Some(format!("MOCK{}", uuid::Uuid::new_v4().simple())),
        })
    }

    fn is_current(&self) -> bool {
        lock(&self.state.current)
            .as_ref()
            .is_some_and(|(id, _)| *id == self.id)
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, credentials_dir: &Path) -> Result<EventStream> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.credential_dirs).push(credentials_dir.to_path_buf());

        let delay = *lock(&self.state.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.state.connect_failures)
            .iter()
            .find(|(kind, _)| *kind == self.kind)
            .map(|(_, message)| message.clone());
        if let Some(message) = failure {
            return Err(anyhow!(message));
        }

        let (tx, rx) = mpsc::channel(256);
        *lock(&self.state.current) = Some((self.id, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt> {
        let receipt = self.next_send()?;
        lock(&self.state.sent).push(SentMessage {
            transport: self.kind,
            to: to.to_string(),
            body: Some(body.to_string()),
            media: None,
        });
        Ok(receipt)
    }

    async fn send_media(&self, to: &str, media: &MediaUpload) -> Result<SendReceipt> {
        let receipt = self.next_send()?;
        lock(&self.state.sent).push(SentMessage {
            transport: self.kind,
            to: to.to_string(),
            body: None,
            media: Some(media.clone()),
        });
        Ok(receipt)
    }

    async fn logout(&self) -> Result<()> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        if self.state.logout_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("logout rejected by mock"));
        }
        Ok(())
    }

    async fn probe(&self) -> TransportProbe {
        if let Some(probe) = lock(&self.state.probe).clone() {
            return probe;
        }
        if self.is_current() {
            TransportProbe::new(SocketState::Connecting, None)
        } else {
            TransportProbe::closed()
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.is_current() {
            *lock(&self.state.probe) = Some(TransportProbe::closed());
        }
        Ok(())
    }

    fn detach(&self) {
        self.state.detaches.fetch_add(1, Ordering::SeqCst);
        let mut current = lock(&self.state.current);
        if current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            current.take();
        }
    }

    async fn is_registered(&self, number: &str) -> Result<bool> {
        Ok(lock(&self.state.registered).contains(number))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_reach_current_connection() {
        let control = MockControl::new();
        let adapter = control.adapter(TransportKind::MultiDevice);
        let mut events = adapter.connect(Path::new("/tmp/a")).await.unwrap();

        assert!(control.pairing_code("2@abcdefghijklmnopqrstuvwxyz"));
        assert_eq!(
            events.next().await,
            Some(TransportEvent::PairingCode("2@abcdefghijklmnopqrstuvwxyz".to_string()))
        );
    }

    #[tokio::test]
    async fn test_detach_of_stale_adapter_keeps_current() {
        let control = MockControl::new();
        let old = control.adapter(TransportKind::MultiDevice);
        let _old_events = old.connect(Path::new("/tmp/a")).await.unwrap();
        let new = control.adapter(TransportKind::MultiDevice);
        let mut new_events = new.connect(Path::new("/tmp/a")).await.unwrap();

        old.detach();
        assert!(control.open("1@s.whatsapp.net"));
        assert!(matches!(
            new_events.next().await,
            Some(TransportEvent::Connection(ConnectionUpdate::Open { .. }))
        ));

        new.detach();
        assert!(!control.emit(TransportEvent::Connection(ConnectionUpdate::Connecting)));
        assert!(new_events.next().await.is_none());
        assert_eq!(control.detach_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_only_for_kind() {
        let control = MockControl::new();
        control.fail_connect(TransportKind::MultiDevice, "library failed to load");

        let primary = control.adapter(TransportKind::MultiDevice);
        let err = primary.connect(Path::new("/tmp/a")).await.err().unwrap();
        assert!(err.to_string().contains("library failed to load"));

        let fallback = control.adapter(TransportKind::WebClient);
        assert!(fallback.connect(Path::new("/tmp/b")).await.is_ok());
        assert_eq!(control.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_probe_follows_open_and_close() {
        let control = MockControl::new();
        let adapter = control.adapter(TransportKind::WebClient);
        let _events = adapter.connect(Path::new("/tmp/a")).await.unwrap();
        assert!(!adapter.probe().await.is_healthy());

        control.open("1@c.us");
        assert!(adapter.probe().await.is_healthy());

        control.close(CloseInfo::with_code(428));
        assert_eq!(adapter.probe().await.socket, SocketState::Closed);
    }
}
