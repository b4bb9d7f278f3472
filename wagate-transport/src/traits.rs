// ABOUTME: The TransportAdapter trait - the boundary to a chat-network library.
// ABOUTME: Adapters are Send + Sync and shared as Arc<dyn TransportAdapter>.

use crate::event::EventStream;
use crate::kind::TransportKind;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// State of the transport's underlying socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketState {
    Open,
    Connecting,
    Closing,
    Closed,
    /// The transport has no socket of its own to observe
    Absent,
}

impl SocketState {
    /// Open, or absent where the transport cannot expose one
    pub fn is_usable(&self) -> bool {
        matches!(self, SocketState::Open | SocketState::Absent)
    }
}

/// Raw health facts reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportProbe {
    pub socket: SocketState,
    /// Authenticated identity, present once the session is linked
    pub identity: Option<String>,
}

impl TransportProbe {
    pub fn new(socket: SocketState, identity: Option<String>) -> Self {
        Self { socket, identity }
    }

    pub fn closed() -> Self {
        Self::new(SocketState::Closed, None)
    }

    pub fn is_healthy(&self) -> bool {
        self.socket.is_usable() && self.identity.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Acknowledgement returned by a successful send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

/// A local file to deliver as an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUpload {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub mime_type: String,
    pub file_name: String,
    pub caption: Option<String>,
}

/// One chat-network library, driven through a single live connection.
///
/// An adapter instance backs at most one connection: `connect` is called once and a
/// fresh instance is created for every reconnect.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the connection, loading credentials from `credentials_dir`.
    ///
    /// Returns once the library is initialized; pairing and the eventual open or
    /// close arrive on the returned stream.
    async fn connect(&self, credentials_dir: &Path) -> Result<EventStream>;

    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt>;

    async fn send_media(&self, to: &str, media: &MediaUpload) -> Result<SendReceipt>;

    /// Whether `logout` does anything for this transport
    fn supports_logout(&self) -> bool {
        true
    }

    /// Unlink this device from the account
    async fn logout(&self) -> Result<()>;

    async fn probe(&self) -> TransportProbe;

    /// Close the connection without unlinking
    async fn close(&self) -> Result<()>;

    /// Stop delivering events; the event stream ends
    fn detach(&self);

    /// Whether `number` (a canonical address) has an account on the network
    async fn is_registered(&self, number: &str) -> Result<bool>;
}
