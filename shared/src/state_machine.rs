//! Link Session State Machine
//!
//! Defines the connection states of the control link to the fixed peer and
//! which transitions between them are legal.

use std::fmt;

/// Connection state of the link session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No session and no attempt in progress
    #[default]
    Disconnected,
    /// Scanning for the peer or waiting for link-up
    Connecting,
    /// Link is up, frame size negotiation in flight
    MtuNegotiating,
    /// Looking for the peer's service and subscribing to its endpoints
    Discovering,
    /// Service found and every notification endpoint subscribed
    Ready,
    /// Waiting to re-establish a dropped or stale session
    Reconnecting,
    /// Gave up; needs an external connect request
    Error,
}

impl LinkState {
    /// Whether a low-level link to the peer exists in this state
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            LinkState::MtuNegotiating | LinkState::Discovering | LinkState::Ready
        )
    }

    /// Whether the manager is idle and would accept a fresh attempt
    pub fn is_idle(&self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Error)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::MtuNegotiating => "mtu-negotiating",
            LinkState::Discovering => "discovering",
            LinkState::Ready => "ready",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Check if a transition from one state to another is valid
pub fn is_valid_transition(from: LinkState, to: LinkState) -> bool {
    use LinkState::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Any state can fail or be torn down
        (_, Error) => true,
        (_, Disconnected) => true,

        // A new attempt can start from any idle or waiting state
        (Disconnected | Error | Reconnecting, Connecting) => true,

        // Link-up
        (Connecting, MtuNegotiating) => true,
        (Connecting, Discovering) => true,
        (MtuNegotiating, Discovering) => true,

        // Service found and subscriptions drained
        (Discovering, Ready) => true,

        // Drops and stale-cache recovery
        (Connecting | MtuNegotiating | Discovering | Ready, Reconnecting) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(LinkState::default(), LinkState::Disconnected);
        assert!(LinkState::default().is_idle());
    }

    #[test]
    fn test_normal_connection_flow() {
        use LinkState::*;
        let path = [Disconnected, Connecting, MtuNegotiating, Discovering, Ready];
        for pair in path.windows(2) {
            assert!(is_valid_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(is_valid_transition(Connecting, Discovering));
    }

    #[test]
    fn test_recovery_flow() {
        use LinkState::*;
        assert!(is_valid_transition(Ready, Reconnecting));
        assert!(is_valid_transition(Discovering, Reconnecting));
        assert!(is_valid_transition(Reconnecting, Connecting));
        assert!(is_valid_transition(Reconnecting, Error));
        assert!(is_valid_transition(Error, Connecting));
    }

    #[test]
    fn test_invalid_transitions() {
        use LinkState::*;
        assert!(!is_valid_transition(Disconnected, Ready));
        assert!(!is_valid_transition(Connecting, Ready));
        assert!(!is_valid_transition(Error, Ready));
        assert!(!is_valid_transition(Ready, MtuNegotiating));
        assert!(!is_valid_transition(Disconnected, Reconnecting));
    }

    #[test]
    fn test_linked_states() {
        assert!(LinkState::Ready.is_linked());
        assert!(LinkState::MtuNegotiating.is_linked());
        assert!(!LinkState::Connecting.is_linked());
        assert!(!LinkState::Reconnecting.is_linked());
    }
}
