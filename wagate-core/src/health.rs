// ABOUTME: SQLite health log fed from session status events.
// ABOUTME: Summarizes recent stability into a 0-100 health score with an alert flag.

use crate::events::{EventBus, EventKind, SessionEvent, StatusUpdate, Subscription};
use crate::runtime::ConnectionState;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Status source used by the supervisor for transport close events
pub const CLOSE_SOURCE: &str = "connection.close";

#[derive(Debug, Clone, Serialize)]
pub struct HealthEvent {
    pub event_type: String,
    pub status: String,
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl Stability {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Stability::Excellent
        } else if score >= 80.0 {
            Stability::Good
        } else if score >= 70.0 {
            Stability::Fair
        } else if score >= 50.0 {
            Stability::Poor
        } else {
            Stability::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyHealth {
    pub date: String,
    pub reconnections: u64,
    pub websocket_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub days: u32,
    pub total_events: u64,
    pub error_count: u64,
    pub reconnections: u64,
    pub websocket_errors: u64,
    pub health_score: f64,
    pub stability: Stability,
    pub should_alert: bool,
    pub daily: Vec<DailyHealth>,
}

impl HealthStats {
    fn from_counts(days: u32, total_events: u64, error_count: u64, reconnections: u64, websocket_errors: u64) -> Self {
        let health_score = health_score(total_events, error_count, reconnections, websocket_errors);
        Self {
            days,
            total_events,
            error_count,
            reconnections,
            websocket_errors,
            health_score,
            stability: Stability::from_score(health_score),
            should_alert: health_score < 70.0 || error_count > 10 || reconnections > 5,
            daily: Vec::new(),
        }
    }
}

/// 100 minus the error rate and capped penalties for reconnections and socket errors
pub fn health_score(total_events: u64, error_count: u64, reconnections: u64, websocket_errors: u64) -> f64 {
    let total = total_events.max(1) as f64;
    let error_rate = error_count as f64 / total * 100.0;
    let reconnection_penalty = (reconnections as f64 * 5.0).min(50.0);
    let websocket_penalty = (websocket_errors as f64 * 10.0).min(30.0);
    (100.0 - error_rate - reconnection_penalty - websocket_penalty).clamp(0.0, 100.0)
}

/// Map a status update to a health log entry; None for transitional states
fn classify(update: &StatusUpdate) -> Option<(&'static str, &'static str)> {
    match update.state {
        ConnectionState::Connected => Some(("connected", "ok")),
        ConnectionState::Reconnecting => Some(("reconnection", "warning")),
        ConnectionState::LoggedOut => Some(("logout", "warning")),
        ConnectionState::Degraded => Some(("degraded", "error")),
        ConnectionState::Disconnected if update.source == CLOSE_SOURCE => {
            let clean = update
                .reason
                .as_deref()
                .map_or(true, |r| r.starts_with("connection-closed"));
            if clean {
                Some(("disconnect", "warning"))
            } else {
                Some(("websocket_error", "error"))
            }
        }
        ConnectionState::Disconnected => Some(("disconnect", "ok")),
        ConnectionState::Initializing | ConnectionState::PairingWaiting => None,
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct HealthLog {
    db: Arc<Mutex<Connection>>,
}

impl HealthLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create health log directory {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open health log database")?;
        let log = Self::with_connection(conn)?;
        tracing::info!(db = %path.display(), "HealthLog initialized");
        Ok(log)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory health log")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS health_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_health_events_created_at ON health_events(created_at)",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    pub fn record(&self, event_type: &str, status: &str, message: Option<&str>, consecutive_failures: u32) -> Result<()> {
        self.record_at(Utc::now(), event_type, status, message, consecutive_failures)
    }

    fn record_at(
        &self,
        at: DateTime<Utc>,
        event_type: &str,
        status: &str,
        message: Option<&str>,
        consecutive_failures: u32,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO health_events (event_type, status, message, consecutive_failures, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![event_type, status, message, consecutive_failures, timestamp(at)],
        )?;
        tracing::debug!(event_type, status, "Health event recorded");
        Ok(())
    }

    /// Record an entry for every status event on `bus` until the subscription drops
    pub fn attach(&self, bus: &EventBus, failures: impl Fn() -> u32 + Send + Sync + 'static) -> Subscription {
        let log = self.clone();
        bus.subscribe(EventKind::Status, move |event| {
            let SessionEvent::Status(update) = event else {
                return;
            };
            let Some((event_type, status)) = classify(update) else {
                return;
            };
            if let Err(e) = log.record(event_type, status, update.reason.as_deref(), failures()) {
                tracing::warn!(error = %e, event_type, "Failed to write health event");
            }
        })
    }

    /// Summary over the last `days` days
    pub fn stats(&self, days: u32) -> Result<HealthStats> {
        let since = timestamp(Utc::now() - Duration::days(days as i64));
        let conn = self.conn()?;
        let (total, errors, reconnections, websocket_errors): (i64, i64, i64, i64) = conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(CASE WHEN status = 'error' THEN 1 END),
                COUNT(CASE WHEN event_type = 'reconnection' THEN 1 END),
                COUNT(CASE WHEN event_type = 'websocket_error' THEN 1 END)
             FROM health_events WHERE created_at >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day,
                COUNT(CASE WHEN event_type = 'reconnection' THEN 1 END),
                COUNT(CASE WHEN event_type = 'websocket_error' THEN 1 END)
             FROM health_events WHERE created_at >= ?1
             GROUP BY day ORDER BY day DESC",
        )?;
        let daily = stmt
            .query_map(params![since], |row| {
                Ok(DailyHealth {
                    date: row.get(0)?,
                    reconnections: row.get::<_, i64>(1)? as u64,
                    websocket_errors: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = HealthStats::from_counts(
            days,
            total as u64,
            errors as u64,
            reconnections as u64,
            websocket_errors as u64,
        );
        stats.daily = daily;
        Ok(stats)
    }

    /// Events from the last 24 hours, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<HealthEvent>> {
        let since = timestamp(Utc::now() - Duration::hours(24));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_type, status, message, consecutive_failures, created_at
             FROM health_events WHERE created_at >= ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![since, limit as i64], |row| {
                Ok(HealthEvent {
                    event_type: row.get(0)?,
                    status: row.get(1)?,
                    message: row.get(2)?,
                    consecutive_failures: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

// =============================================================================
// Tests
// =============================================================================
