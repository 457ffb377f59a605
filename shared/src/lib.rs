//! FieldLink Shared Protocol Types
//!
//! This crate provides the wire types, framing and link state machine shared
//! by the field agent and its tooling:
//! - BLE fragment framing for messages larger than one notification
//! - Length-prefixed stream codec for the fallback transport
//! - Directive and radio-request wire formats
//! - The link session state machine

pub mod codec;
pub mod directive;
pub mod fragment;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use directive::{Directive, DirectiveError, DirectiveKind, RadioKind, RadioRequest};
pub use fragment::{Fragment, FragmentError, FragmentKind, Reassembler};
pub use state_machine::LinkState;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Well-known GATT identifiers of the fixed peer and of secondary peripherals
pub mod uuids {
    use uuid::Uuid;

    /// Service exposed by the fixed peer
    pub const PEER_SERVICE: Uuid = Uuid::from_u128(0xa1b2c3d4_e5f6_7890_abcd_ef1234567890);

    /// Peer inbound endpoint (we write requests here)
    pub const PEER_INBOUND_WRITE: Uuid = Uuid::from_u128(0xa1b2c3d4_0001_7890_abcd_ef1234567890);

    /// Peer primary notification endpoint (responses)
    pub const PEER_PRIMARY_NOTIFY: Uuid = Uuid::from_u128(0xa1b2c3d4_0002_7890_abcd_ef1234567890);

    /// Peer control notification endpoint (radio directives)
    pub const PEER_CONTROL_NOTIFY: Uuid = Uuid::from_u128(0xa1b2c3d4_0003_7890_abcd_ef1234567890);

    /// Notification endpoints the agent subscribes to, in subscription order
    pub const PEER_NOTIFY_ENDPOINTS: [Uuid; 2] = [PEER_PRIMARY_NOTIFY, PEER_CONTROL_NOTIFY];

    /// Service advertised by secondary peripheral peers
    pub const PERIPHERAL_SERVICE: Uuid = Uuid::from_u128(0xa1b2c3d4_f00d_7890_abcd_ef1234567890);

    /// Peripheral inbound endpoint
    pub const PERIPHERAL_INBOUND: Uuid = Uuid::from_u128(0xa1b2c3d4_f001_7890_abcd_ef1234567890);

    /// Peripheral outbound endpoint
    pub const PERIPHERAL_OUTBOUND: Uuid = Uuid::from_u128(0xa1b2c3d4_f002_7890_abcd_ef1234567890);
}

/// Timing and retry parameters for the link and the dispatcher
pub mod timing {
    /// How long a peer scan runs before falling back to the last known address
    pub const SCAN_TIMEOUT_MS: u64 = 8_000;

    /// Delay between frame-size negotiation and endpoint discovery
    pub const MTU_SETTLE_MS: u64 = 300;

    /// Delay between endpoint discovery attempts on the same connection
    pub const DISCOVERY_RETRY_DELAY_MS: u64 = 1_000;

    /// Endpoint discovery retries before the local cache is considered stale
    pub const MAX_DISCOVERY_RETRIES: u32 = 3;

    /// Settle delay after tearing a session down for a full reconnect
    pub const FULL_RECONNECT_SETTLE_MS: u64 = 3_000;

    /// Full reconnection cycles before giving up
    pub const MAX_FULL_RECONNECTS: u32 = 2;

    /// Delay before reconnecting after an unexpected drop
    pub const AUTO_RECONNECT_DELAY_MS: u64 = 5_000;

    /// ATT MTU requested during negotiation
    pub const REQUESTED_MTU: u16 = 517;

    /// ATT MTU assumed until negotiation completes
    pub const DEFAULT_ATT_MTU: u16 = 23;

    /// ATT header bytes not available to notification payloads
    pub const ATT_HEADER_LEN: usize = 3;

    /// How long a radio-enable request may stay unconfirmed
    pub const RADIO_CONFIRM_TIMEOUT_MS: u64 = 12_000;

    /// Settle delay after the control radio reports ready
    pub const CONTROL_RADIO_SETTLE_MS: u64 = 2_000;

    /// Settle delay after the data radio reports ready (Wi-Fi takes longer)
    pub const DATA_RADIO_SETTLE_MS: u64 = 3_000;

    /// Frame payload budget for a negotiated ATT MTU
    pub fn frame_budget(att_mtu: u16) -> usize {
        (att_mtu as usize).saturating_sub(ATT_HEADER_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_family() {
        assert_eq!(
            uuids::PEER_SERVICE.to_string(),
            "a1b2c3d4-e5f6-7890-abcd-ef1234567890"
        );
        assert_eq!(
            uuids::PEER_CONTROL_NOTIFY.to_string(),
            "a1b2c3d4-0003-7890-abcd-ef1234567890"
        );
        assert_ne!(uuids::PERIPHERAL_SERVICE, uuids::PEER_SERVICE);
    }

    #[test]
    fn test_frame_budget() {
        assert_eq!(timing::frame_budget(timing::DEFAULT_ATT_MTU), 20);
        assert_eq!(timing::frame_budget(517), 514);
        assert_eq!(timing::frame_budget(2), 0);
    }
}
