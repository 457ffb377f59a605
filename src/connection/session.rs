//! The single link session to the fixed peer

use bluer::Address;
use fieldlink_shared::{timing, LinkState};
use std::collections::{BTreeSet, HashSet, VecDeque};
use uuid::Uuid;

/// Everything the manager knows about the ongoing attempt to reach the peer
#[derive(Debug, Clone)]
pub struct LinkSession {
    pub state: LinkState,
    /// Negotiated ATT MTU (default until negotiation succeeds)
    pub att_mtu: u16,
    /// Every service and endpoint seen by the last discovery
    pub endpoints: BTreeSet<Uuid>,
    /// Endpoint discovery retries on the current connection
    pub discovery_retries: u32,
    /// Full teardown-and-rediscover cycles since the last ready session
    pub full_reconnects: u32,
    pub peer_address: Option<Address>,
    /// An auto-reconnect is scheduled or running
    pub reconnect_in_flight: bool,
    /// Frame size negotiation already completed on this connection
    pub mtu_resolved: bool,
    /// Notification endpoints still to subscribe
    pub pending_subscriptions: VecDeque<Uuid>,
    /// Subscription write in flight
    pub subscribing: Option<Uuid>,
    pub scanning: bool,
    /// Secondary peripherals seen while scanning
    pub peripherals: HashSet<Address>,
}

impl LinkSession {
    pub fn new(peer_address: Option<Address>) -> Self {
        Self {
            state: LinkState::Disconnected,
            att_mtu: timing::DEFAULT_ATT_MTU,
            endpoints: BTreeSet::new(),
            discovery_retries: 0,
            full_reconnects: 0,
            peer_address,
            reconnect_in_flight: false,
            mtu_resolved: false,
            pending_subscriptions: VecDeque::new(),
            subscribing: None,
            scanning: false,
            peripherals: HashSet::new(),
        }
    }

    /// Bytes one write or notification can carry
    pub fn frame_budget(&self) -> usize {
        timing::frame_budget(self.att_mtu)
    }

    /// Forget everything tied to one physical connection
    pub fn reset_connection(&mut self) {
        self.att_mtu = timing::DEFAULT_ATT_MTU;
        self.endpoints.clear();
        self.discovery_retries = 0;
        self.mtu_resolved = false;
        self.pending_subscriptions.clear();
        self.subscribing = None;
    }

    /// Restart the retry budgets (new external request or a ready session)
    pub fn reset_counters(&mut self) {
        self.discovery_retries = 0;
        self.full_reconnects = 0;
    }
}
