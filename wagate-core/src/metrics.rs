// ABOUTME: Prometheus metrics for session lifecycle, sends and pairing.
// ABOUTME: Thin wrappers over the `metrics` facade; the binary installs the exporter.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder; later calls return the same handle
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    describe();
    Ok(HANDLE.get_or_init(|| handle).clone())
}

fn describe() {
    metrics::describe_counter!("wagate_reinit_total", "Guarded reinitializations by reason and outcome");
    metrics::describe_counter!("wagate_messages_sent_total", "Outbound messages accepted by the transport");
    metrics::describe_counter!("wagate_send_failures_total", "Failed outbound send attempts");
    metrics::describe_counter!("wagate_messages_received_total", "Inbound messages delivered to collaborators");
    metrics::describe_counter!("wagate_qr_published_total", "Pairing codes published");
    metrics::describe_counter!("wagate_errors_total", "Errors by kind");
    metrics::describe_gauge!("wagate_connected", "1 while the session is connected");
}

pub fn record_reinit(reason: &str, outcome: &'static str) {
    metrics::counter!("wagate_reinit_total", "reason" => reason.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_message_sent() {
    metrics::counter!("wagate_messages_sent_total").increment(1);
}

pub fn record_send_failure() {
    metrics::counter!("wagate_send_failures_total").increment(1);
}

pub fn record_message_received() {
    metrics::counter!("wagate_messages_received_total").increment(1);
}

pub fn record_qr_published() {
    metrics::counter!("wagate_qr_published_total").increment(1);
}

pub fn record_error(kind: &'static str) {
    metrics::counter!("wagate_errors_total", "kind" => kind).increment(1);
}

pub fn set_connected(connected: bool) {
    metrics::gauge!("wagate_connected").set(if connected { 1.0 } else { 0.0 });
}
