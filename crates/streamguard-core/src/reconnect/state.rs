// ── Reconnection state machine ──

use serde::Serialize;
use strum::{Display, EnumIter};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Reconnecting,
    ReconnectFailed,
    DegradedMode,
}

impl ReconnectionState {
    /// Whether `self -> to` is a legal transition. Self-transitions are
    /// not transitions and are reported as illegal; callers treat them
    /// as no-ops.
    pub fn can_transition_to(self, to: Self) -> bool {
        use ReconnectionState as S;

        match (self, to) {
            (S::Idle, S::Connecting)
            | (
                S::Connecting,
                S::Connected | S::Disconnected | S::Reconnecting | S::DegradedMode,
            )
            | (S::Connected, S::Disconnected | S::Reconnecting)
            | (S::Disconnecting, S::Disconnected)
            | (
                S::Disconnected,
                S::Idle | S::Connecting | S::Reconnecting | S::DegradedMode,
            )
            | (
                S::Reconnecting,
                S::Connected | S::Disconnected | S::ReconnectFailed | S::DegradedMode,
            )
            | (S::ReconnectFailed, S::Disconnected | S::Reconnecting)
            | (S::DegradedMode, S::Reconnecting | S::Connected | S::Disconnected) => true,
            // Teardown is always possible once something is running.
            (from, S::Disconnecting) => !matches!(from, S::Idle | S::Disconnecting),
            _ => false,
        }
    }

    /// No live connection and nothing driving one.
    pub fn is_down(self) -> bool {
        matches!(self, Self::Disconnected | Self::DegradedMode)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn serializes_screaming_snake_case() {
        assert_eq!(ReconnectionState::ReconnectFailed.to_string(), "RECONNECT_FAILED");
        assert_eq!(
            serde_json::to_value(ReconnectionState::DegradedMode).unwrap_or_default(),
            "DEGRADED_MODE"
        );
    }

    #[test]
    fn self_transitions_are_rejected() {
        for s in ReconnectionState::iter() {
            assert!(!s.can_transition_to(s), "{s}");
        }
    }

    #[test]
    fn outage_path_is_legal() {
        use ReconnectionState as S;
        let path = [
            S::Idle,
            S::Connecting,
            S::Connected,
            S::Disconnected,
            S::DegradedMode,
            S::Reconnecting,
            S::ReconnectFailed,
            S::Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn idle_cannot_jump_to_connected() {
        assert!(!ReconnectionState::Idle.can_transition_to(ReconnectionState::Connected));
        assert!(!ReconnectionState::Idle.can_transition_to(ReconnectionState::Disconnecting));
    }

    #[test]
    fn disconnecting_reachable_from_any_running_state() {
        for s in ReconnectionState::iter()
            .filter(|s| !matches!(s, ReconnectionState::Idle | ReconnectionState::Disconnecting))
        {
            assert!(s.can_transition_to(ReconnectionState::Disconnecting), "{s}");
        }
    }
}
