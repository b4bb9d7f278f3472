// ABOUTME: Converts each transport's inbound payload shape into canonical InboundMessages.
// ABOUTME: Drops self-echoes and broadcast traffic; attachments always get a non-empty body.

use crate::address::normalize_address;
use crate::message::{Direction, InboundMessage};
use chrono::{DateTime, Utc};
use wagate_transport::payload::{MultiDeviceContent, MultiDeviceMessage};
use wagate_transport::{InboundPayload, MediaKind, MultiDeviceUpsert, TransportKind, WebClientMessage};

/// Normalize one inbound payload; `received_at` stands in for missing timestamps
pub fn normalize(payload: &InboundPayload, received_at: DateTime<Utc>) -> Vec<InboundMessage> {
    match payload {
        InboundPayload::MultiDevice(upsert) => normalize_upsert(upsert, received_at),
        InboundPayload::WebClient(message) => normalize_web_client(message, received_at)
            .into_iter()
            .collect(),
    }
}

fn normalize_upsert(upsert: &MultiDeviceUpsert, received_at: DateTime<Utc>) -> Vec<InboundMessage> {
    if !upsert.is_live() {
        tracing::debug!(kind = %upsert.kind, count = upsert.messages.len(), "Skipping non-live upsert");
        return Vec::new();
    }
    upsert
        .messages
        .iter()
        .filter_map(|message| normalize_multi_device(message, received_at))
        .collect()
}

fn normalize_multi_device(message: &MultiDeviceMessage, received_at: DateTime<Utc>) -> Option<InboundMessage> {
    if message.key.from_me {
        return None;
    }
    let remote = message.key.remote_jid.as_deref().filter(|jid| !jid.is_empty())?;
    if is_broadcast(remote) {
        return None;
    }

    let id = message
        .key
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_id);
    let (body, media_type) = multi_device_body(message.message.as_ref()?, &id)?;

    Some(InboundMessage {
        id,
        address_canonical: normalize_address(remote, TransportKind::MultiDevice),
        body,
        direction: Direction::In,
        timestamp: timestamp_or(message.timestamp_secs(), received_at),
        media_type,
        source_transport: TransportKind::MultiDevice,
        sender_name: message.push_name.clone().filter(|n| !n.is_empty()),
    })
}

fn multi_device_body(content: &MultiDeviceContent, id: &str) -> Option<(String, Option<MediaKind>)> {
    if let Some(text) = non_empty(content.conversation.as_deref()) {
        return Some((text.to_string(), None));
    }
    if let Some(text) = non_empty(
        content
            .extended_text_message
            .as_ref()
            .and_then(|ext| ext.text.as_deref()),
    ) {
        return Some((text.to_string(), None));
    }

    let attachments = [
        (MediaKind::Image, &content.image_message),
        (MediaKind::Video, &content.video_message),
        (MediaKind::Audio, &content.audio_message),
        (MediaKind::Document, &content.document_message),
    ];
    for (kind, media) in attachments {
        if let Some(media) = media {
            let body = match non_empty(media.caption.as_deref()) {
                Some(caption) => caption.to_string(),
                None => placeholder(kind, id, media.file_name.as_deref()),
            };
            return Some((body, Some(kind)));
        }
    }
    None
}

fn normalize_web_client(message: &WebClientMessage, received_at: DateTime<Utc>) -> Option<InboundMessage> {
    if message.from_me || message.from.is_empty() || is_broadcast(&message.from) {
        return None;
    }

    let id = message.id.serialized().map(str::to_string).unwrap_or_else(new_id);
    let media_type = match message.kind.as_str() {
        "image" | "sticker" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        "audio" | "ptt" => Some(MediaKind::Audio),
        "document" => Some(MediaKind::Document),
        _ if message.has_media => Some(MediaKind::Document),
        _ => None,
    };

    let body = match media_type {
        // media bodies carry a base64 thumbnail, never user text
        Some(kind) => match non_empty(message.caption.as_deref()) {
            Some(caption) => caption.to_string(),
            None => placeholder(kind, &id, message.filename.as_deref()),
        },
        None => non_empty(Some(message.body.as_str()))?.to_string(),
    };

    Some(InboundMessage {
        id,
        address_canonical: normalize_address(&message.from, TransportKind::WebClient),
        body,
        direction: Direction::In,
        timestamp: timestamp_or(message.timestamp, received_at),
        media_type,
        source_transport: TransportKind::WebClient,
        sender_name: message.notify_name.clone().filter(|n| !n.is_empty()),
    })
}

/// Body for an attachment without caption; keeps the message id as a reference
pub fn placeholder(kind: MediaKind, id: &str, file_name: Option<&str>) -> String {
    match non_empty(file_name) {
        Some(name) => format!("[{}:{}] {}", kind.as_str(), id, name),
        None => format!("[{}:{}]", kind.as_str(), id),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_broadcast(address: &str) -> bool {
    address.ends_with("@broadcast")
}

fn timestamp_or(secs: Option<i64>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or(fallback)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Tests
// =============================================================================
