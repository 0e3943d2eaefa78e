// ============================================================================
// Gateway State
// ============================================================================
//
// Linear lifecycle of the affinity core:
//
// ```text
// Starting ──mark_started──> Started ──stop──> Stopping ──drained─> Stopped
// ```
//
// No edge leads backwards; a stopped gateway is never restarted.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GatewayState {
    Starting = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl GatewayState {
    /// Returns true for the only edges the state machine allows.
    pub fn can_transition_to(self, next: GatewayState) -> bool {
        matches!(
            (self, next),
            (GatewayState::Starting, GatewayState::Started)
                | (GatewayState::Started, GatewayState::Stopping)
                | (GatewayState::Stopping, GatewayState::Stopped)
        )
    }

    /// Shutdown has begun or completed.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, GatewayState::Stopping | GatewayState::Stopped)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => GatewayState::Starting,
            1 => GatewayState::Started,
            2 => GatewayState::Stopping,
            _ => GatewayState::Stopped,
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatewayState::Starting => "starting",
            GatewayState::Started => "started",
            GatewayState::Stopping => "stopping",
            GatewayState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_edges_are_allowed() {
        use GatewayState::*;
        assert!(Starting.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        assert!(!Starting.can_transition_to(Stopping));
        assert!(!Started.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Started.can_transition_to(Started));
    }

    #[test]
    fn raw_round_trip() {
        for state in [
            GatewayState::Starting,
            GatewayState::Started,
            GatewayState::Stopping,
            GatewayState::Stopped,
        ] {
            assert_eq!(GatewayState::from_u8(state.as_u8()), state);
        }
    }
}
