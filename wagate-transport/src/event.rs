// ABOUTME: Events a transport emits while a connection is alive.
// ABOUTME: Every backend translates its own vocabulary into this closed set.

use crate::payload::InboundPayload;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Stream of events for one physical connection
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Close codes shared by both backends (multi-device disconnect numbering)
pub mod close_code {
    pub const LOGGED_OUT: u16 = 401;
    pub const PAIRING_TIMEOUT: u16 = 408;
    pub const CONNECTION_CLOSED: u16 = 428;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const BAD_SESSION: u16 = 500;
    pub const RESTART_REQUIRED: u16 = 515;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection lifecycle change
    Connection(ConnectionUpdate),
    /// Raw pairing code to show as a QR image
    PairingCode(String),
    /// Inbound message batch in the transport's own shape
    Inbound(InboundPayload),
    /// Credential material changed and should be persisted
    CredentialsUpdated(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    Connecting,
    Open {
        /// Authenticated identity, when the transport reports one
        identity: Option<String>,
    },
    Closed(CloseInfo),
}

/// Why a connection closed, as reported by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    pub status_code: Option<u16>,
    pub message: Option<String>,
    /// Tag of a stream-level error node, e.g. `stream:error`
    pub stream_tag: Option<String>,
    /// First child tag of the stream error node, e.g. `conflict`
    pub stream_child: Option<String>,
}

impl CloseInfo {
    pub fn with_code(code: u16) -> Self {
        Self {
            status_code: Some(code),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Short human-readable description for logs and status events
    pub fn describe(&self) -> String {
        match (&self.status_code, &self.message) {
            (Some(code), Some(msg)) => format!("{} ({})", msg, code),
            (Some(code), None) => format!("closed with code {}", code),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "connection closed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_prefers_message_with_code() {
        let info = CloseInfo::with_code(close_code::CONNECTION_REPLACED).message("Stream Errored (conflict)");
        assert_eq!(info.describe(), "Stream Errored (conflict) (440)");
    }

    #[test]
    fn test_describe_without_details() {
        assert_eq!(CloseInfo::default().describe(), "connection closed");
        assert_eq!(CloseInfo::with_code(515).describe(), "closed with code 515");
    }
}
