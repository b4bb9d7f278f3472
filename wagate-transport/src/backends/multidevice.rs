// ABOUTME: Multi-device transport - drives a sidecar bridge process over stdio JSONL.
// ABOUTME: The sidecar owns the protocol library; this side maps its events and requests.

use super::bridge::{expect_bool, lock, receipt_from, BridgeFrame, BridgeLink};
use crate::event::{close_code, CloseInfo, ConnectionUpdate, EventStream, TransportEvent};
use crate::kind::TransportKind;
use crate::payload::{InboundPayload, MultiDeviceUpsert};
use crate::traits::{MediaUpload, SendReceipt, SocketState, TransportAdapter, TransportProbe};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Configuration for the multi-device sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiDeviceConfig {
    /// Executable that runs the bridge, e.g. `node`
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments before the ones this transport appends
    #[serde(default)]
    pub args: Vec<String>,
    /// Browser name the linked device shows up as
    #[serde(default = "default_browser_name")]
    pub browser_name: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_command() -> String {
    "node".to_string()
}

fn default_browser_name() -> String {
    "wagate".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for MultiDeviceConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: vec!["bridge/multidevice.mjs".to_string()],
            browser_name: default_browser_name(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

pub struct MultiDeviceTransport {
    config: MultiDeviceConfig,
    link: Arc<BridgeLink>,
    child: Mutex<Option<Child>>,
}

impl MultiDeviceTransport {
    pub fn new(config: MultiDeviceConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        Self {
            config,
            link: Arc::new(BridgeLink::new(timeout)),
            child: Mutex::new(None),
        }
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::TransportFactory {
        Box::new(|config| {
            let cfg: MultiDeviceConfig = if config.is_null() {
                MultiDeviceConfig::default()
            } else {
                serde_json::from_value(config.clone()).context("Invalid multidevice config")?
            };
            Ok(Arc::new(MultiDeviceTransport::new(cfg)) as Arc<dyn TransportAdapter>)
        })
    }

    fn spawn_child(&self, credentials_dir: &Path) -> Result<Child> {
        let mut args = self.config.args.clone();
        args.push("--auth-dir".to_string());
        args.push(credentials_dir.display().to_string());
        args.push("--browser".to_string());
        args.push(self.config.browser_name.clone());

        tracing::debug!(command = %self.config.command, ?args, "Spawning multi-device bridge");

        ProcessCommand::new(&self.config.command)
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn multi-device bridge '{}'", self.config.command))
    }
}

#[async_trait]
impl TransportAdapter for MultiDeviceTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::MultiDevice
    }

    async fn connect(&self, credentials_dir: &Path) -> Result<EventStream> {
        let mut child = self.spawn_child(credentials_dir)?;
        let mut stdin = child.stdin.take().context("Failed to capture bridge stdin")?;
        let stdout = child.stdout.take().context("Failed to capture bridge stdout")?;
        let stderr = child.stderr.take().context("Failed to capture bridge stderr")?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        self.link.attach(out_tx, event_tx);
        self.link.set_probe(TransportProbe::new(SocketState::Connecting, None));

        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                let write = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = write.await {
                    tracing::warn!(error = %e, "Failed to write to multi-device bridge");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    tracing::debug!(stderr = %line, "Multi-device bridge stderr");
                }
            }
        });

        let link = Arc::clone(&self.link);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match BridgeFrame::parse(&line) {
                    Some(BridgeFrame::Reply { id, outcome }) => link.resolve(id, outcome),
                    Some(BridgeFrame::Event { name, data }) => {
                        for event in parse_bridge_event(&name, &data) {
                            link.emit(event).await;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::trace!(line = %line, "Ignoring non-frame bridge output"),
                }
            }

            tracing::info!("Multi-device bridge output ended");
            let was_live = link.is_attached();
            link.shutdown("multi-device bridge exited");
            if was_live {
                link.emit(TransportEvent::Connection(ConnectionUpdate::Closed(
                    CloseInfo::with_code(close_code::CONNECTION_CLOSED).message("bridge process exited"),
                )))
                .await;
            }
            link.detach();
        });

        *lock(&self.child) = Some(child);
        Ok(Box::pin(ReceiverStream::new(event_rx)))
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt> {
        let result = self
            .link
            .request("send", json!({"to": to, "content": {"text": body}}))
            .await?;
        Ok(receipt_from(&result))
    }

    async fn send_media(&self, to: &str, media: &MediaUpload) -> Result<SendReceipt> {
        let result = self
            .link
            .request(
                "sendMedia",
                json!({
                    "to": to,
                    "kind": media.kind.as_str(),
                    "path": media.path.display().to_string(),
                    "mimetype": media.mime_type,
                    "fileName": media.file_name,
                    "caption": media.caption,
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
        if !self.link.is_attached() {
            return self.link.cached_probe();
        }
        match self
            .link
            .request_with_timeout("probe", Value::Null, Duration::from_secs(5))
            .await
        {
            Ok(result) => {
                let probe = probe_from(&result);
                self.link.set_probe(probe.clone());
                probe
            }
            Err(e) => {
                tracing::debug!(error = %e, "Multi-device probe failed, using cached state");
                self.link.cached_probe()
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.link.is_attached() {
            if let Err(e) = self
                .link
                .request_with_timeout("end", Value::Null, Duration::from_secs(2))
                .await
            {
                tracing::debug!(error = %e, "Bridge did not acknowledge end");
            }
        }
        self.link.shutdown("transport closed");

        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(status) => tracing::debug!(?status, "Multi-device bridge exited"),
                Err(_) => {
                    tracing::warn!("Multi-device bridge did not exit, killing it");
                    child.start_kill().context("Failed to kill multi-device bridge")?;
                }
            }
        }
        Ok(())
    }

    fn detach(&self) {
        self.link.detach();
    }

    async fn is_registered(&self, number: &str) -> Result<bool> {
        let result = self.link.request("onWhatsApp", json!({"jid": number})).await?;
        expect_bool(&result, "exists")
    }
}

/// Translate one sidecar event into transport events
fn parse_bridge_event(name: &str, data: &Value) -> Vec<TransportEvent> {
    match name {
        "connection.update" => parse_connection_update(data),
        "messages.upsert" => match serde_json::from_value::<MultiDeviceUpsert>(data.clone()) {
            Ok(upsert) => vec![TransportEvent::Inbound(InboundPayload::MultiDevice(upsert))],
            Err(e) => {
                tracing::warn!(error = %e, "Malformed messages.upsert from bridge");
                Vec::new()
            }
        },
        "creds.update" => vec![TransportEvent::CredentialsUpdated(data.clone())],
        other => {
            tracing::trace!(event = %other, "Unhandled multi-device bridge event");
            Vec::new()
        }
    }
}

fn parse_connection_update(data: &Value) -> Vec<TransportEvent> {
    let mut events = Vec::new();

    if let Some(qr) = data.get("qr").and_then(Value::as_str) {
        events.push(TransportEvent::PairingCode(qr.to_string()));
    }

    match data.get("connection").and_then(Value::as_str) {
        Some("connecting") => events.push(TransportEvent::Connection(ConnectionUpdate::Connecting)),
        Some("open") => {
            let identity = data
                .pointer("/user/id")
                .and_then(Value::as_str)
                .map(str::to_string);
            events.push(TransportEvent::Connection(ConnectionUpdate::Open { identity }));
        }
        Some("close") => {
            let error = data.pointer("/lastDisconnect/error");
            let info = CloseInfo {
                status_code: error
                    .and_then(|e| e.pointer("/output/statusCode"))
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok()),
                message: error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                stream_tag: error
                    .and_then(|e| e.pointer("/data/tag"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                stream_child: error
                    .and_then(|e| e.pointer("/data/content/0/tag"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            events.push(TransportEvent::Connection(ConnectionUpdate::Closed(info)));
        }
        _ => {}
    }

    events
}

fn probe_from(result: &Value) -> TransportProbe {
    let socket = match result.get("readyState").and_then(Value::as_str) {
        Some("open") => SocketState::Open,
        Some("connecting") => SocketState::Connecting,
        Some("closing") => SocketState::Closing,
        Some("closed") => SocketState::Closed,
        _ => SocketState::Absent,
    };
    let identity = result
        .pointer("/user/id")
        .and_then(Value::as_str)
        .map(str::to_string);
    TransportProbe::new(socket, identity)
}
