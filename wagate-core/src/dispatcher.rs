// ABOUTME: Outbound send path - health gating, bounded retry with linear backoff, reinit escalation.
// ABOUTME: Talks to the supervisor through SessionControl so tests can substitute a fake.

use crate::address::normalize_address;
use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::error::{SessionError, SessionResult};
use crate::message::OutboundResult;
use crate::metrics;
use crate::supervisor::ConnectionSupervisor;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wagate_transport::{MediaKind, MediaUpload, SendReceipt, TransportAdapter, TransportKind};

/// What the dispatcher needs from whoever owns the session
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn deep_health_check(&self) -> bool;

    fn active_adapter(&self) -> Option<(TransportKind, Arc<dyn TransportAdapter>)>;

    fn record_send_success(&self);

    /// Returns the consecutive failure count after this failure
    fn record_send_failure(&self) -> u32;

    /// Request a guarded reinit without waiting for it
    fn schedule_reinit(&self, reason: &'static str);
}

#[async_trait]
impl SessionControl for ConnectionSupervisor {
    async fn deep_health_check(&self) -> bool {
        ConnectionSupervisor::deep_health_check(self).await
    }

    fn active_adapter(&self) -> Option<(TransportKind, Arc<dyn TransportAdapter>)> {
        ConnectionSupervisor::active_adapter(self)
    }

    fn record_send_success(&self) {
        ConnectionSupervisor::record_send_success(self)
    }

    fn record_send_failure(&self) -> u32 {
        ConnectionSupervisor::record_send_failure(self)
    }

    fn schedule_reinit(&self, reason: &'static str) {
        self.spawn_reinit(reason)
    }
}

enum Outbound<'a> {
    Text(&'a str),
    Media(&'a MediaUpload),
}

pub struct OutboundDispatcher {
    control: Arc<dyn SessionControl>,
    clock: Arc<dyn Clock>,
    attempts: u32,
    backoff: Duration,
}

impl OutboundDispatcher {
    pub fn new(control: Arc<dyn SessionControl>, clock: Arc<dyn Clock>, recovery: &RecoveryConfig) -> Self {
        Self {
            control,
            clock,
            attempts: recovery.send_attempts.max(1),
            backoff: recovery.send_backoff(),
        }
    }

    pub async fn send(&self, destination: &str, body: &str) -> SessionResult<OutboundResult> {
        self.deliver(destination, Outbound::Text(body)).await
    }

    pub async fn send_media(
        &self,
        destination: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> SessionResult<OutboundResult> {
        let upload = media_upload(path, caption).await?;
        self.deliver(destination, Outbound::Media(&upload)).await
    }

    /// Whether `number` has an account; requires a healthy session
    pub async fn is_registered(&self, number: &str) -> SessionResult<bool> {
        let (kind, adapter) = self.healthy_adapter().await.ok_or(SessionError::NotConnected)?;
        let address = normalize_address(number, kind);
        adapter
            .is_registered(&address)
            .await
            .map_err(|e| SessionError::TransportUnavailable(format!("{:#}", e)))
    }

    async fn healthy_adapter(&self) -> Option<(TransportKind, Arc<dyn TransportAdapter>)> {
        if !self.control.deep_health_check().await {
            return None;
        }
        self.control.active_adapter()
    }

    async fn deliver(&self, destination: &str, outbound: Outbound<'_>) -> SessionResult<OutboundResult> {
        let started = self.clock.now();
        let Some((kind, adapter)) = self.healthy_adapter().await else {
            tracing::warn!(to = %destination, "Send rejected, session not healthy");
            metrics::record_error(SessionError::NotConnected.kind());
            self.control.schedule_reinit("pre-send");
            return Err(SessionError::NotConnected);
        };
        let to = normalize_address(destination, kind);

        let mut last_error = String::new();
        let mut attempts_made = 0;
        for attempt in 1..=self.attempts {
            attempts_made = attempt;
            match self.attempt(adapter.as_ref(), &to, &outbound).await {
                Ok(receipt) => {
                    self.control.record_send_success();
                    metrics::record_message_sent();
                    let elapsed_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64;
                    tracing::info!(to = %to, transport = %kind, attempt, elapsed_ms, "Message sent");
                    return Ok(OutboundResult {
                        ok: true,
                        attempt,
                        elapsed_ms,
                        message_id: receipt.message_id,
                    });
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    metrics::record_send_failure();
                    let failures = self.control.record_send_failure();
                    tracing::warn!(to = %to, attempt, failures, error = %last_error, "Send attempt failed");

                    if failures >= self.attempts {
                        self.control.schedule_reinit("send-fail");
                        break;
                    }
                    if attempt < self.attempts {
                        self.clock.sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        metrics::record_error("send_failed");
        Err(SessionError::SendFailed {
            attempts: attempts_made,
            message: last_error,
        })
    }

    async fn attempt(
        &self,
        adapter: &dyn TransportAdapter,
        to: &str,
        outbound: &Outbound<'_>,
    ) -> anyhow::Result<SendReceipt> {
        match outbound {
            Outbound::Text(body) => adapter.send_text(to, body).await,
            Outbound::Media(upload) => adapter.send_media(to, upload).await,
        }
    }
}

/// Describe a local file for upload; the MIME type picks the media kind
pub async fn media_upload(path: &Path, caption: Option<&str>) -> SessionResult<MediaUpload> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| SessionError::InvalidMedia(format!("{}: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(SessionError::InvalidMedia(format!("{} is not a regular file", path.display())));
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let kind = match mime.type_().as_str() {
        "image" => MediaKind::Image,
        "video" => MediaKind::Video,
        "audio" => MediaKind::Audio,
        _ => MediaKind::Document,
    };
    let caption = match kind {
        MediaKind::Audio => None,
        _ => caption.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());

    Ok(MediaUpload {
        path: path.to_path_buf(),
        kind,
        mime_type: mime.essence_str().to_string(),
        file_name,
        caption,
    })
}

// =============================================================================
// Tests
// =============================================================================
