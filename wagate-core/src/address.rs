// ABOUTME: Canonical recipient addresses for the active transport.
// ABOUTME: normalize_address is idempotent: canonical input comes back unchanged.

use wagate_transport::kind::{MULTIDEVICE_SUFFIX, WEBCLIENT_SUFFIX};
use wagate_transport::TransportKind;

/// Normalize a phone number or address into `kind`'s canonical form.
///
/// - individual addresses of either transport lose any device part and are re-suffixed for `kind`
/// - other addresses (groups, broadcast lists) pass through untouched
/// - bare input is reduced to its digits and suffixed
/// - input without digits is returned trimmed and otherwise as-is
pub fn normalize_address(input: &str, kind: TransportKind) -> String {
    let trimmed = input.trim();

    for suffix in [MULTIDEVICE_SUFFIX, WEBCLIENT_SUFFIX] {
        if let Some(user) = trimmed.strip_suffix(suffix) {
            return format!("{}{}", address_user(user), kind.address_suffix());
        }
    }
    if trimmed.contains('@') {
        return trimmed.to_string();
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return trimmed.to_string();
    }
    format!("{}{}", digits, kind.address_suffix())
}

/// User part of an address, without device or server suffix
pub fn address_user(address: &str) -> &str {
    let user = address.split('@').next().unwrap_or(address);
    user.split(':').next().unwrap_or(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "11999999999",
        "+55 (11) 99999-9999",
        "5511999999999@s.whatsapp.net",
        "5511999999999:12@s.whatsapp.net",
        "5511999999999@c.us",
        "120363025246125486@g.us",
        "status@broadcast",
        "  5511988887777  ",
        "",
        "abc",
        "@",
        "55@c.us@c.us",
    ];

    #[test]
    fn test_bare_number_gets_transport_suffix() {
        assert_eq!(
            normalize_address("11999999999", TransportKind::MultiDevice),
            "11999999999@s.whatsapp.net"
        );
        assert_eq!(normalize_address("11999999999", TransportKind::WebClient), "11999999999@c.us");
    }

    #[test]
    fn test_formatting_characters_are_stripped() {
        assert_eq!(
            normalize_address("+55 (11) 99999-9999", TransportKind::MultiDevice),
            "5511999999999@s.whatsapp.net"
        );
    }

    #[test]
    fn test_individual_addresses_are_resuffixed() {
        assert_eq!(
            normalize_address("5511999999999@c.us", TransportKind::MultiDevice),
            "5511999999999@s.whatsapp.net"
        );
        assert_eq!(
            normalize_address("5511999999999@s.whatsapp.net", TransportKind::WebClient),
            "5511999999999@c.us"
        );
    }

    #[test]
    fn test_device_part_is_dropped_when_resuffixing() {
        assert_eq!(
            normalize_address("5511999999999:12@s.whatsapp.net", TransportKind::MultiDevice),
            "5511999999999@s.whatsapp.net"
        );
        assert_eq!(
            normalize_address("5511999999999:3@s.whatsapp.net", TransportKind::WebClient),
            "5511999999999@c.us"
        );
    }

    #[test]
    fn test_group_and_digitless_input_pass_through() {
        assert_eq!(
            normalize_address("120363025246125486@g.us", TransportKind::MultiDevice),
            "120363025246125486@g.us"
        );
        assert_eq!(normalize_address("abc", TransportKind::MultiDevice), "abc");
        assert_eq!(normalize_address("", TransportKind::WebClient), "");
    }

    #[test]
    fn test_normalization_is_a_fixed_point() {
        for kind in TransportKind::ALL {
            for input in SAMPLES {
                let once = normalize_address(input, kind);
                let twice = normalize_address(&once, kind);
                assert_eq!(once, twice, "not idempotent for {:?} on {}", input, kind);
            }
        }
    }

    #[test]
    fn test_address_user_strips_device_and_server() {
        assert_eq!(address_user("5511999999999:12@s.whatsapp.net"), "5511999999999");
        assert_eq!(address_user("5511@c.us"), "5511");
        assert_eq!(address_user("5511"), "5511");
    }
}
