// ABOUTME: Canonical message types handed to collaborators.
// ABOUTME: InboundMessage is built once by the normalizer and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wagate_transport::{MediaKind, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// A message in the gateway's canonical model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Sender address in the source transport's canonical form
    pub address_canonical: String,
    /// Never empty: attachments without caption carry a placeholder
    pub body: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub media_type: Option<MediaKind>,
    pub source_transport: TransportKind,
    /// Display name the sender chose, when the transport reports it
    pub sender_name: Option<String>,
}

/// Result of one outbound send call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResult {
    pub ok: bool,
    /// Attempt that succeeded, starting at 1
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub message_id: Option<String>,
}
