// ABOUTME: Classifies transport close events and maps each class to a recovery plan.
// ABOUTME: Precedence is fixed: bad session, restart required, conflict, logged out, pairing timeout.

use crate::config::RecoveryConfig;
use crate::error::SessionError;
use std::time::Duration;
use wagate_transport::event::close_code;
use wagate_transport::CloseInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    BadSession,
    RestartRequired,
    Conflict,
    LoggedOut,
    PairingTimeout,
    Other,
}

/// What the supervisor does after a close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub wipe_credentials: bool,
    pub force_logout: bool,
    pub delay: Duration,
    /// Reason handed to the guarded reinit
    pub reason: &'static str,
}

impl CloseReason {
    /// Classify a close; the first matching class wins
    pub fn classify(info: &CloseInfo) -> CloseReason {
        let code = info.status_code;
        let message = info.message.as_deref().unwrap_or_default().to_ascii_lowercase();

        if code == Some(close_code::BAD_SESSION) {
            CloseReason::BadSession
        } else if code == Some(close_code::RESTART_REQUIRED) {
            CloseReason::RestartRequired
        } else if is_conflict(info, &message) {
            CloseReason::Conflict
        } else if code == Some(close_code::LOGGED_OUT) {
            CloseReason::LoggedOut
        } else if code == Some(close_code::PAIRING_TIMEOUT) || message.contains("qr refs attempts ended") {
            CloseReason::PairingTimeout
        } else {
            CloseReason::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::BadSession => "bad-session",
            CloseReason::RestartRequired => "restart-required",
            CloseReason::Conflict => "conflict",
            CloseReason::LoggedOut => "logged-out",
            CloseReason::PairingTimeout => "pairing-timeout",
            CloseReason::Other => "connection-closed",
        }
    }

    /// Error this close represents, if it is one collaborators should see
    pub fn error(&self) -> Option<SessionError> {
        match self {
            CloseReason::BadSession => Some(SessionError::SessionInvalid),
            CloseReason::Conflict => Some(SessionError::Conflict),
            CloseReason::PairingTimeout => Some(SessionError::PairingTimeout),
            _ => None,
        }
    }

    pub fn plan(&self, recovery: &RecoveryConfig) -> RecoveryPlan {
        let short = Duration::from_millis(recovery.close_delay_ms);
        let (wipe_credentials, force_logout, delay) = match self {
            CloseReason::BadSession => (true, false, short),
            CloseReason::RestartRequired => (false, false, short),
            CloseReason::Conflict => (false, true, short),
            CloseReason::LoggedOut => (false, true, Duration::from_millis(recovery.logged_out_delay_ms)),
            CloseReason::PairingTimeout => (false, false, Duration::from_millis(recovery.pairing_timeout_delay_ms)),
            CloseReason::Other => (false, false, Duration::ZERO),
        };
        RecoveryPlan {
            wipe_credentials,
            force_logout,
            delay,
            reason: self.as_str(),
        }
    }
}

fn is_conflict(info: &CloseInfo, message: &str) -> bool {
    if info.status_code == Some(close_code::CONNECTION_REPLACED) || message.contains("conflict") {
        return true;
    }
    info.stream_tag.as_deref() == Some("stream:error")
        && matches!(info.stream_child.as_deref(), Some("replaced") | Some("conflict"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: Option<u16>, message: Option<&str>) -> CloseReason {
        CloseReason::classify(&CloseInfo {
            status_code: code,
            message: message.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(classify(Some(500), None), CloseReason::BadSession);
        assert_eq!(classify(Some(515), None), CloseReason::RestartRequired);
        assert_eq!(classify(Some(440), None), CloseReason::Conflict);
        assert_eq!(classify(Some(401), None), CloseReason::LoggedOut);
        assert_eq!(classify(Some(408), None), CloseReason::PairingTimeout);
        assert_eq!(classify(Some(428), None), CloseReason::Other);
        assert_eq!(classify(None, None), CloseReason::Other);
    }

    #[test]
    fn test_messages_classify_without_codes() {
        assert_eq!(classify(None, Some("Stream Errored (conflict)")), CloseReason::Conflict);
        assert_eq!(classify(None, Some("QR refs attempts ended")), CloseReason::PairingTimeout);
    }

    #[test]
    fn test_stream_error_node_conflict() {
        let info = CloseInfo {
            stream_tag: Some("stream:error".to_string()),
            stream_child: Some("replaced".to_string()),
            ..Default::default()
        };
        assert_eq!(CloseReason::classify(&info), CloseReason::Conflict);

        let unrelated = CloseInfo {
            stream_tag: Some("stream:error".to_string()),
            stream_child: Some("ack".to_string()),
            ..Default::default()
        };
        assert_eq!(CloseReason::classify(&unrelated), CloseReason::Other);
    }

    #[test]
    fn test_precedence_first_match_wins() {
        // bad session outranks a conflict message
        assert_eq!(classify(Some(500), Some("conflict")), CloseReason::BadSession);
        // restart required outranks a conflict message
        assert_eq!(classify(Some(515), Some("conflict")), CloseReason::RestartRequired);
        // conflict outranks logged out and pairing timeout
        assert_eq!(classify(Some(401), Some("conflict")), CloseReason::Conflict);
        assert_eq!(classify(Some(408), Some("replaced: conflict")), CloseReason::Conflict);
        // logged out outranks a pairing timeout message
        assert_eq!(classify(Some(401), Some("QR refs attempts ended")), CloseReason::LoggedOut);
    }

    #[test]
    fn test_recovery_plans() {
        let recovery = RecoveryConfig::default();

        let bad = CloseReason::BadSession.plan(&recovery);
        assert!(bad.wipe_credentials && !bad.force_logout);
        assert_eq!(bad.delay, Duration::from_millis(500));

        let restart = CloseReason::RestartRequired.plan(&recovery);
        assert!(!restart.wipe_credentials && !restart.force_logout);
        assert_eq!(restart.delay, Duration::from_millis(500));

        let conflict = CloseReason::Conflict.plan(&recovery);
        assert!(conflict.force_logout);
        assert_eq!(conflict.delay, Duration::from_millis(500));

        let logged_out = CloseReason::LoggedOut.plan(&recovery);
        assert!(logged_out.force_logout);
        assert_eq!(logged_out.delay, Duration::from_millis(800));

        let timeout = CloseReason::PairingTimeout.plan(&recovery);
        assert_eq!(timeout.delay, Duration::from_millis(1000));
        assert_eq!(timeout.reason, "pairing-timeout");

        assert_eq!(CloseReason::Other.plan(&recovery).delay, Duration::ZERO);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(CloseReason::BadSession.error(), Some(SessionError::SessionInvalid));
        assert_eq!(CloseReason::Conflict.error(), Some(SessionError::Conflict));
        assert_eq!(CloseReason::PairingTimeout.error(), Some(SessionError::PairingTimeout));
        assert_eq!(CloseReason::Other.error(), None);
    }
}
