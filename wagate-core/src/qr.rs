// ABOUTME: Pairing-code flow: throttles raw codes, validates them, renders a scannable PNG.
// ABOUTME: Holds the single current QrPayload; publishing a new one supersedes the old.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::Serialize;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::Clock;

/// Codes shorter than this are never real pairing codes
pub const MIN_CODE_LEN: usize = 20;

/// A published pairing code and its rendered image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrPayload {
    /// PNG bytes
    #[serde(skip)]
    pub image: Vec<u8>,
    pub raw_code: String,
    pub issued_at: DateTime<Utc>,
}

impl QrPayload {
    /// `data:` URL suitable for an <img> tag
    pub fn data_url(&self) -> String {
        use base64::Engine;
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.image)
        )
    }
}

/// Turns a raw pairing string into image bytes
pub trait QrRenderer: Send + Sync {
    fn render(&self, code: &str) -> Result<Vec<u8>>;
}

/// PNG renderer with maximum error correction and a quiet zone
#[derive(Debug, Clone, Copy)]
pub struct PngQrRenderer {
    pub min_size: u32,
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self { min_size: 400 }
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, code: &str) -> Result<Vec<u8>> {
        let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::H)
            .context("Pairing code does not fit in a QR symbol")?;
        let image = qr
            .render::<Luma<u8>>()
            .quiet_zone(true)
            .min_dimensions(self.min_size, self.min_size)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("Failed to encode QR image as PNG")?;
        Ok(png)
    }
}

/// Why a raw code was not published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrRejection {
    Throttled { since_last: Duration },
    Invalid,
    RenderFailed(String),
}

struct QrSlot {
    latest: Option<Arc<QrPayload>>,
    last_published_at: Option<Instant>,
}

pub struct QrPairingFlow {
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn QrRenderer>,
    throttle: Duration,
    slot: Mutex<QrSlot>,
}

impl QrPairingFlow {
    pub fn new(clock: Arc<dyn Clock>, renderer: Arc<dyn QrRenderer>, throttle: Duration) -> Self {
        Self {
            clock,
            renderer,
            throttle,
            slot: Mutex::new(QrSlot {
                latest: None,
                last_published_at: None,
            }),
        }
    }

    /// Offer a raw code from the transport; returns the payload if it was published
    pub fn offer(&self, raw_code: &str) -> std::result::Result<Arc<QrPayload>, QrRejection> {
        let payload = self.prepare(raw_code)?;
        self.commit(&payload);
        Ok(payload)
    }

    /// Throttle, validate and render a code without publishing it.
    /// Nothing is visible through `latest` until the payload is committed.
    pub fn prepare(&self, raw_code: &str) -> std::result::Result<Arc<QrPayload>, QrRejection> {
        let now = self.clock.now();
        let last_published_at = self.slot().last_published_at;
        if let Some(last) = last_published_at {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.throttle {
                tracing::debug!(since_last_ms = since_last.as_millis() as u64, "Pairing code throttled");
                return Err(QrRejection::Throttled { since_last });
            }
        }

        let code = raw_code.trim();
        if code.len() < MIN_CODE_LEN {
            tracing::warn!(len = code.len(), "Rejecting malformed pairing code");
            return Err(QrRejection::Invalid);
        }

        let image = self.renderer.render(code).map_err(|e| {
            tracing::error!(error = %e, "Failed to render pairing code");
            QrRejection::RenderFailed(e.to_string())
        })?;
        Ok(Arc::new(QrPayload {
            image,
            raw_code: code.to_string(),
            issued_at: self.clock.wall(),
        }))
    }

    /// Make a prepared payload the latest one and start the throttle window
    pub fn commit(&self, payload: &Arc<QrPayload>) {
        let mut slot = self.slot();
        slot.latest = Some(Arc::clone(payload));
        slot.last_published_at = Some(self.clock.now());
        tracing::info!(bytes = payload.image.len(), "Pairing code published");
    }

    pub fn latest(&self) -> Option<Arc<QrPayload>> {
        self.slot().latest.clone()
    }

    /// Drop the current payload and reopen the throttle window
    pub fn clear(&self) {
        let mut slot = self.slot();
        slot.latest = None;
        slot.last_published_at = None;
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, QrSlot> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// =============================================================================
// Tests
// =============================================================================
