// ABOUTME: Web client transport - talks to a browser-driven client through a websocket bridge.
// ABOUTME: Maps the client's qr/ready/message/disconnected events onto transport events.

use super::bridge::{expect_bool, receipt_from, BridgeFrame, BridgeLink};
use crate::event::{close_code, CloseInfo, ConnectionUpdate, EventStream, TransportEvent};
use crate::kind::TransportKind;
use crate::payload::{InboundPayload, WebClientMessage};
use crate::traits::{MediaUpload, SendReceipt, SocketState, TransportAdapter, TransportProbe};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Configuration for the web client bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebClientConfig {
    /// Bridge websocket endpoint
    #[serde(default = "default_url")]
    pub url: String,
    /// Session name the bridge keys its browser profile by
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Run the browser without a window
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:3300/session".to_string()
}

fn default_session_name() -> String {
    "wagate".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for WebClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            session_name: default_session_name(),
            headless: default_headless(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

pub struct WebClientTransport {
    config: WebClientConfig,
    link: Arc<BridgeLink>,
}

impl WebClientTransport {
    pub fn new(config: WebClientConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        Self {
            config,
            link: Arc::new(BridgeLink::new(timeout)),
        }
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::TransportFactory {
        Box::new(|config| {
            let cfg: WebClientConfig = if config.is_null() {
                WebClientConfig::default()
            } else {
                serde_json::from_value(config.clone()).context("Invalid webclient config")?
            };
            Ok(Arc::new(WebClientTransport::new(cfg)) as Arc<dyn TransportAdapter>)
        })
    }
}

#[async_trait]
impl TransportAdapter for WebClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebClient
    }

    async fn connect(&self, credentials_dir: &Path) -> Result<EventStream> {
        tracing::debug!(url = %self.config.url, "Connecting to web client bridge");
        let (ws, _response) = connect_async(self.config.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to web client bridge at {}", self.config.url))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        self.link.attach(out_tx, event_tx);
        self.link.set_probe(TransportProbe::new(SocketState::Absent, None));

        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(line)).await {
                    tracing::warn!(error = %e, "Failed to write to web client bridge");
                    break;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        let link = Arc::clone(&self.link);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Web client bridge socket error");
                        break;
                    }
                };
                match BridgeFrame::parse(&text) {
                    Some(BridgeFrame::Reply { id, outcome }) => link.resolve(id, outcome),
                    Some(BridgeFrame::Event { name, data }) => {
                        if let Some(event) = parse_client_event(&name, &data) {
                            link.emit(event).await;
                        }
                    }
                    None => tracing::trace!(frame = %text, "Ignoring unrecognized bridge frame"),
                }
            }

            tracing::info!("Web client bridge socket ended");
            let was_live = link.is_attached();
            link.shutdown("web client bridge disconnected");
            if was_live {
                link.emit(TransportEvent::Connection(ConnectionUpdate::Closed(
                    CloseInfo::with_code(close_code::CONNECTION_CLOSED).message("bridge socket closed"),
                )))
                .await;
            }
            link.detach();
        });

        self.link
            .request(
                "start",
                json!({
                    "session": self.config.session_name,
                    "dataPath": credentials_dir.display().to_string(),
                    "headless": self.config.headless,
                }),
            )
            .await
            .context("Web client bridge refused to start the session")?;

        Ok(Box::pin(ReceiverStream::new(event_rx)))
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt> {
        let result = self
            .link
            .request("sendMessage", json!({"chatId": to, "content": body}))
            .await?;
        Ok(receipt_from(&result))
    }

    async fn send_media(&self, to: &str, media: &MediaUpload) -> Result<SendReceipt> {
        let result = self
            .link
            .request(
                "sendFile",
                json!({
                    "chatId": to,
                    "path": media.path.display().to_string(),
                    "filename": media.file_name,
                    "mimetype": media.mime_type,
                    "caption": media.caption,
                    "asVoice": false,
                }),
            )
            .await?;
        Ok(receipt_from(&result))
    }

    async fn logout(&self) -> Result<()> {
        self.link.request("logout", Value::Null).await?;
        Ok(())
    }

    async fn probe(&self) -> TransportProbe {
        self.link.cached_probe()
    }

    async fn close(&self) -> Result<()> {
        if self.link.is_attached() {
            if let Err(e) = self
                .link
                .request_with_timeout("destroy", Value::Null, Duration::from_secs(5))
                .await
            {
                tracing::debug!(error = %e, "Bridge did not acknowledge destroy");
            }
        }
        self.link.shutdown("transport closed");
        Ok(())
    }

    fn detach(&self) {
        self.link.detach();
    }

    async fn is_registered(&self, number: &str) -> Result<bool> {
        let result = self
            .link
            .request("isRegisteredUser", json!({"chatId": number}))
            .await?;
        expect_bool(&result, "registered")
    }
}

/// Translate one web client event into a transport event
fn parse_client_event(name: &str, data: &Value) -> Option<TransportEvent> {
    match name {
        "qr" => data
            .as_str()
            .map(|code| TransportEvent::PairingCode(code.to_string())),
        "ready" => {
            let identity = data
                .get("wid")
                .and_then(|wid| wid.as_str().or_else(|| wid.get("_serialized").and_then(Value::as_str)))
                .map(str::to_string);
            Some(TransportEvent::Connection(ConnectionUpdate::Open { identity }))
        }
        "message" => match serde_json::from_value::<WebClientMessage>(data.clone()) {
            Ok(message) => Some(TransportEvent::Inbound(InboundPayload::WebClient(message))),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed message from web client bridge");
                None
            }
        },
        "change_state" => match data.as_str() {
            Some("OPENING") | Some("PAIRING") => Some(TransportEvent::Connection(ConnectionUpdate::Connecting)),
            _ => None,
        },
        "disconnected" => {
            let reason = data.as_str().unwrap_or("disconnected");
            let code = match reason.to_ascii_uppercase().as_str() {
                "LOGOUT" | "UNPAIRED" | "UNPAIRED_IDLE" => close_code::LOGGED_OUT,
                "CONFLICT" => close_code::CONNECTION_REPLACED,
                "TIMEOUT" => close_code::PAIRING_TIMEOUT,
                _ => close_code::CONNECTION_CLOSED,
            };
            Some(TransportEvent::Connection(ConnectionUpdate::Closed(
                CloseInfo::with_code(code).message(reason),
            )))
        }
        "auth_failure" => {
            let message = data.as_str().unwrap_or("authentication failure");
            Some(TransportEvent::Connection(ConnectionUpdate::Closed(
                CloseInfo::with_code(close_code::BAD_SESSION).message(message),
            )))
        }
        other => {
            tracing::trace!(event = %other, "Unhandled web client event");
            None
        }
    }
}
