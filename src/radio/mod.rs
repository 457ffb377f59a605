//! Local radio plane: what the dispatcher can observe and change directly
//!
//! The primary radio carries the control link and can only be observed
//! here. The secondary radio can be observed, and its network joined or
//! left; powering it is requested from the peer instead.

mod nmcli;
mod prompt;

pub use nmcli::{NmcliRadioPlane, RadioSnapshot};
pub use prompt::LogPrompt;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a network join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { network: String },
    Failed { network: String, reason: String },
}

impl JoinOutcome {
    pub fn network(&self) -> &str {
        match self {
            JoinOutcome::Joined { network } | JoinOutcome::Failed { network, .. } => network,
        }
    }
}

impl fmt::Display for JoinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinOutcome::Joined { network } => write!(f, "joined {}", network),
            JoinOutcome::Failed { network, reason } => {
                write!(f, "failed to join {}: {}", network, reason)
            }
        }
    }
}

/// Invoked once when a join attempt finishes
pub type JoinCallback = Box<dyn FnOnce(JoinOutcome) + Send>;

/// Radios of this device
pub trait RadioPlane: Send + Sync {
    fn is_primary_radio_enabled(&self) -> bool;

    fn is_secondary_radio_enabled(&self) -> bool;

    fn is_secondary_network_joined(&self) -> bool;

    /// Start joining a named network; the outcome arrives through `on_result`
    fn join_network(&self, name: &str, secret: &str, on_result: JoinCallback);

    fn leave_network(&self);
}

/// Asks the operator to act when no channel can
pub trait UserPrompt: Send + Sync {
    fn prompt_enable_control_radio(&self, reason: &str);
}

/// Configuration for the NetworkManager radio plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Wireless interface used for the secondary network
    pub interface: String,
    /// How often radio state is re-read
    pub poll_interval_ms: u64,
    /// Upper bound for one join attempt
    pub join_timeout_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".into(),
            poll_interval_ms: 2_000,
            join_timeout_ms: 30_000,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_outcome_display() {
        let ok = JoinOutcome::Joined {
            network: "X".into(),
        };
        assert_eq!(ok.to_string(), "joined X");
        assert_eq!(ok.network(), "X");

        let failed = JoinOutcome::Failed {
            network: "X".into(),
            reason: "timeout".into(),
        };
        assert_eq!(failed.to_string(), "failed to join X: timeout");
    }

    #[test]
    fn test_radio_config_from_partial_toml() {
        let config: RadioConfig = toml::from_str("interface = \"wlp2s0\"").unwrap();
        assert_eq!(config.interface, "wlp2s0");
        assert_eq!(config.poll_interval_ms, 2_000);
    }
}
