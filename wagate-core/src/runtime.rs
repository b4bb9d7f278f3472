// ABOUTME: Process-wide session state: the authoritative ConnectionState and runtime counters.
// ABOUTME: Mutated only by the supervisor; everyone else reads RuntimeStatus snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use wagate_transport::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Initializing,
    PairingWaiting,
    Connected,
    /// Believed connected, but the last health probe failed
    Degraded,
    Reconnecting,
    LoggedOut,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::PairingWaiting => "pairing_waiting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::LoggedOut => "logged_out",
        }
    }

    /// States in which a live adapter is driving the session
    pub fn has_live_session(&self) -> bool {
        matches!(
            self,
            ConnectionState::Initializing
                | ConnectionState::PairingWaiting
                | ConnectionState::Connected
                | ConnectionState::Degraded
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable runtime counters
#[derive(Debug, Clone, Default)]
pub struct SessionRuntime {
    pub consecutive_failures: u32,
    pub stale: bool,
    pub last_ready_at: Option<DateTime<Utc>>,
    /// Id of the reinit currently in flight
    pub reinit_in_flight: Option<u64>,
    pub last_reinit_attempt: Option<Instant>,
    pub last_reason: Option<String>,
    pub qr_attempts: u32,
}

impl SessionRuntime {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only snapshot for collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub ready: bool,
    pub state: ConnectionState,
    pub active_transport: Option<TransportKind>,
    pub consecutive_failures: u32,
    pub stale: bool,
    pub last_ready_at: Option<DateTime<Utc>>,
    pub reinit_in_flight: bool,
    pub last_reason: Option<String>,
    pub qr_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_restores_initial_values() {
        let mut runtime = SessionRuntime {
            consecutive_failures: 3,
            stale: true,
            last_ready_at: Some(Utc::now()),
            reinit_in_flight: Some(4),
            last_reinit_attempt: Some(Instant::now()),
            last_reason: Some("send-fail".to_string()),
            qr_attempts: 2,
        };
        runtime.reset();

        assert_eq!(runtime.consecutive_failures, 0);
        assert!(!runtime.stale);
        assert!(runtime.last_ready_at.is_none());
        assert!(runtime.reinit_in_flight.is_none());
        assert!(runtime.last_reinit_attempt.is_none());
        assert!(runtime.last_reason.is_none());
        assert_eq!(runtime.qr_attempts, 0);
    }

    #[test]
    fn test_live_session_states() {
        assert!(ConnectionState::PairingWaiting.has_live_session());
        assert!(ConnectionState::Degraded.has_live_session());
        assert!(!ConnectionState::Reconnecting.has_live_session());
        assert!(!ConnectionState::LoggedOut.has_live_session());
        assert_eq!(
            serde_json::to_string(&ConnectionState::PairingWaiting).unwrap(),
            "\"pairing_waiting\""
        );
    }
}
