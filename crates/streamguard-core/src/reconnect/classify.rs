// ── Disconnect classification ──
//
// Ordered, case-insensitive keyword rules. Source-specific phrases are
// checked before generic network phrases so that "stream ended: network
// error" is attributed to the source, and authentication last so that a
// network hiccup mentioning a login page still gets retried.

use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisconnectKind {
    /// The live source itself ended or paused the stream.
    Tiktok,
    Network,
    Auth,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisconnectSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectClassification {
    #[serde(rename = "type")]
    pub kind: DisconnectKind,
    pub severity: DisconnectSeverity,
    pub requires_reconnection: bool,
    pub description: &'static str,
}

struct Rule {
    phrases: &'static [&'static str],
    kind: DisconnectKind,
    severity: DisconnectSeverity,
    requires_reconnection: bool,
    description: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        phrases: &["maintenance", "server upgrade", "service unavailable"],
        kind: DisconnectKind::Tiktok,
        severity: DisconnectSeverity::Medium,
        requires_reconnection: true,
        description: "live platform under maintenance",
    },
    Rule {
        phrases: &[
            "stream ended",
            "live has ended",
            "live ended",
            "stream is offline",
            "user is offline",
            "host ended",
            "room closed",
        ],
        kind: DisconnectKind::Tiktok,
        severity: DisconnectSeverity::Low,
        requires_reconnection: true,
        description: "live stream ended by the source",
    },
    Rule {
        phrases: &["rate limit", "too many requests", "429"],
        kind: DisconnectKind::Tiktok,
        severity: DisconnectSeverity::Medium,
        requires_reconnection: true,
        description: "rate limited by the live platform",
    },
    Rule {
        phrases: &[
            "network",
            "timeout",
            "timed out",
            "econnreset",
            "econnrefused",
            "etimedout",
            "enotfound",
            "socket hang up",
            "connection reset",
            "connection refused",
            "connection lost",
            "connection closed",
            "dns",
        ],
        kind: DisconnectKind::Network,
        severity: DisconnectSeverity::Medium,
        requires_reconnection: true,
        description: "network connectivity lost",
    },
    Rule {
        phrases: &[
            "unauthorized",
            "authentication",
            "auth failed",
            "forbidden",
            "invalid credentials",
            "invalid session",
            "session expired",
            "401",
            "403",
        ],
        kind: DisconnectKind::Auth,
        severity: DisconnectSeverity::High,
        requires_reconnection: false,
        description: "authentication rejected",
    },
];

const UNKNOWN: DisconnectClassification = DisconnectClassification {
    kind: DisconnectKind::Unknown,
    severity: DisconnectSeverity::Medium,
    requires_reconnection: true,
    description: "unrecognized disconnect reason",
};

/// Classify a disconnect message. Pure: the same input always yields
/// the same classification, regardless of letter case.
pub fn classify_disconnect_reason(message: &str) -> DisconnectClassification {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.phrases.iter().any(|p| lowered.contains(p)))
        .map_or(UNKNOWN, |rule| DisconnectClassification {
            kind: rule.kind,
            severity: rule.severity,
            requires_reconnection: rule.requires_reconnection,
            description: rule.description,
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn source_phrases_win_over_network_phrases() {
        let c = classify_disconnect_reason("Stream ended after network timeout");
        assert_eq!(c.kind, DisconnectKind::Tiktok);
        assert!(c.requires_reconnection);
    }

    #[test]
    fn maintenance_is_a_source_disconnect() {
        let c = classify_disconnect_reason("Platform MAINTENANCE window");
        assert_eq!(c.kind, DisconnectKind::Tiktok);
        assert_eq!(c.severity, DisconnectSeverity::Medium);
    }

    #[test]
    fn network_errors_are_retryable() {
        for msg in ["ECONNRESET", "socket hang up", "Request timed out"] {
            let c = classify_disconnect_reason(msg);
            assert_eq!(c.kind, DisconnectKind::Network, "{msg}");
            assert!(c.requires_reconnection);
        }
    }

    #[test]
    fn auth_errors_do_not_reconnect() {
        let c = classify_disconnect_reason("401 Unauthorized: invalid session");
        assert_eq!(c.kind, DisconnectKind::Auth);
        assert_eq!(c.severity, DisconnectSeverity::High);
        assert!(!c.requires_reconnection);
    }

    #[test]
    fn unknown_fails_open_toward_retrying() {
        let c = classify_disconnect_reason("something odd happened");
        assert_eq!(c, UNKNOWN);
        assert!(c.requires_reconnection);
        assert_eq!(classify_disconnect_reason("").kind, DisconnectKind::Unknown);
    }

    #[test]
    fn classification_ignores_case() {
        let lower = classify_disconnect_reason("connection refused");
        let upper = classify_disconnect_reason("CONNECTION REFUSED");
        assert_eq!(lower, upper);
        assert_eq!(lower, classify_disconnect_reason("connection refused"));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let json = serde_json::to_value(classify_disconnect_reason("forbidden")).unwrap_or_default();
        assert_eq!(json["type"], "auth");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["requiresReconnection"], false);
    }
}
