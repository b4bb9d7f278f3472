// ABOUTME: Identifies which transport implementation backs a session.
// ABOUTME: Each kind owns its canonical individual-address suffix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address suffix used by the multi-device socket protocol
pub const MULTIDEVICE_SUFFIX: &str = "@s.whatsapp.net";
/// Address suffix used by the browser-driven web client
pub const WEBCLIENT_SUFFIX: &str = "@c.us";

/// The two transport implementations a session can run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Multi-device socket protocol spoken by a sidecar process
    MultiDevice,
    /// Browser-driven web client reached over a websocket bridge
    WebClient,
}

impl TransportKind {
    pub const ALL: [TransportKind; 2] = [TransportKind::MultiDevice, TransportKind::WebClient];

    /// Stable name used in config, registry keys and directory names
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::MultiDevice => "multidevice",
            TransportKind::WebClient => "webclient",
        }
    }

    /// Suffix this transport expects on individual-user addresses
    pub fn address_suffix(&self) -> &'static str {
        match self {
            TransportKind::MultiDevice => MULTIDEVICE_SUFFIX,
            TransportKind::WebClient => WEBCLIENT_SUFFIX,
        }
    }

    /// The other kind, used as the default fallback
    pub fn other(&self) -> TransportKind {
        match self {
            TransportKind::MultiDevice => TransportKind::WebClient,
            TransportKind::WebClient => TransportKind::MultiDevice,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multidevice" | "multi-device" | "baileys" => Ok(TransportKind::MultiDevice),
            "webclient" | "web-client" | "venom" | "wwebjs" => Ok(TransportKind::WebClient),
            other => Err(format!("Unknown transport: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_library_aliases() {
        assert_eq!("baileys".parse::<TransportKind>().unwrap(), TransportKind::MultiDevice);
        assert_eq!("VENOM".parse::<TransportKind>().unwrap(), TransportKind::WebClient);
        assert_eq!(" webclient ".parse::<TransportKind>().unwrap(), TransportKind::WebClient);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = "telegram".parse::<TransportKind>().unwrap_err();
        assert!(err.contains("Unknown transport"));
    }

    #[test]
    fn test_other_is_involution() {
        for kind in TransportKind::ALL {
            assert_ne!(kind, kind.other());
            assert_eq!(kind, kind.other().other());
        }
    }

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&TransportKind::MultiDevice).unwrap();
        assert_eq!(json, "\"multidevice\"");
        assert_eq!(TransportKind::MultiDevice.to_string(), "multidevice");
    }
}
