// ABOUTME: Caller-facing error taxonomy for session operations.
// ABOUTME: Errors are Clone so every joiner of a single-flight operation gets the same value.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No transport library could be initialized
    #[error("no transport available: {0}")]
    TransportUnavailable(String),

    /// The session failed its health check; nothing was sent
    #[error("session is not connected")]
    NotConnected,

    /// Stored credentials were rejected and have been wiped
    #[error("session credentials are invalid; pairing required")]
    SessionInvalid,

    /// Another client claimed the same identity
    #[error("session was replaced by another client")]
    Conflict,

    /// The pairing code expired before a device was linked
    #[error("pairing timed out")]
    PairingTimeout,

    #[error("send failed after {attempts} attempt(s): {message}")]
    SendFailed { attempts: u32, message: String },

    #[error("invalid media: {0}")]
    InvalidMedia(String),
}

impl SessionError {
    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::TransportUnavailable(_) => "transport_unavailable",
            SessionError::NotConnected => "not_connected",
            SessionError::SessionInvalid => "session_invalid",
            SessionError::Conflict => "conflict",
            SessionError::PairingTimeout => "pairing_timeout",
            SessionError::SendFailed { .. } => "send_failed",
            SessionError::InvalidMedia(_) => "invalid_media",
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failed_carries_underlying_message() {
        let err = SessionError::SendFailed {
            attempts: 2,
            message: "socket hang up".to_string(),
        };
        assert_eq!(err.to_string(), "send failed after 2 attempt(s): socket hang up");
        assert_eq!(err.kind(), "send_failed");
    }
}
