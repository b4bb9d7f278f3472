// ABOUTME: Inbound payload shapes exactly as each transport bridge delivers them.
// ABOUTME: Kept transport-shaped on purpose; normalization happens in wagate-core.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound traffic tagged with the shape it arrived in
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    MultiDevice(MultiDeviceUpsert),
    WebClient(WebClientMessage),
}

// =============================================================================
// Multi-device shapes
// =============================================================================

/// A `messages.upsert` batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiDeviceUpsert {
    /// "notify" for live traffic, "append" for history sync
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub messages: Vec<MultiDeviceMessage>,
}

impl MultiDeviceUpsert {
    pub fn is_live(&self) -> bool {
        self.kind == "notify"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiDeviceMessage {
    #[serde(default)]
    pub key: MessageKey,
    /// Epoch seconds, delivered either as a number or a numeric string
    #[serde(default)]
    pub message_timestamp: Option<Value>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<MultiDeviceContent>,
}

impl MultiDeviceMessage {
    pub fn timestamp_secs(&self) -> Option<i64> {
        match self.message_timestamp.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Object(obj) => obj.get("low").and_then(Value::as_i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiDeviceContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub image_message: Option<MediaMessage>,
    #[serde(default)]
    pub video_message: Option<MediaMessage>,
    #[serde(default)]
    pub audio_message: Option<MediaMessage>,
    #[serde(default)]
    pub document_message: Option<MediaMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

// =============================================================================
// Web client shapes
// =============================================================================

/// A `message` event from the browser-driven client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebClientMessage {
    #[serde(default)]
    pub id: WebClientId,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub has_media: bool,
    /// chat, image, video, audio, ptt, document, sticker, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub notify_name: Option<String>,
}

/// Message ids arrive either structured or as a plain serialized string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebClientId {
    Structured {
        #[serde(rename = "_serialized", default)]
        serialized: String,
        #[serde(default)]
        id: Option<String>,
    },
    Plain(String),
}

impl Default for WebClientId {
    fn default() -> Self {
        WebClientId::Plain(String::new())
    }
}

impl WebClientId {
    /// Full serialized id, falling back to the short id
    pub fn serialized(&self) -> Option<&str> {
        let value = match self {
            WebClientId::Structured { serialized, id } => {
                if serialized.is_empty() {
                    id.as_deref().unwrap_or_default()
                } else {
                    serialized.as_str()
                }
            }
            WebClientId::Plain(s) => s.as_str(),
        };
        (!value.is_empty()).then_some(value)
    }
}
