//! Link session manager: connection lifecycle to the fixed peer
//!
//! A finite-state machine driven by two entry points: `handle_event` for
//! radio-stack callbacks and `on_timer` for its own deferred steps. Both run
//! on the agent event loop, one event at a time.

use super::session::LinkSession;
use crate::timer::{Fired, Scheduler, Timers};
use crate::transport::traits::{
    Capabilities, DiscoveredService, RadioError, RadioEvent, RadioStack, ScanFilter, ScanRecord,
};
use bluer::Address;
use bytes::Bytes;
use fieldlink_shared::{
    fragment, state_machine::is_valid_transition, timing, uuids, LinkState, Reassembler,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the link session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Known address of the fixed peer (used when scanning finds nothing)
    pub peer_address: Option<String>,
    /// Case-insensitive name fragments identifying the peer when it does not advertise its service
    pub name_hints: Vec<String>,
    /// Reconnect automatically after an unexpected drop
    pub auto_reconnect: bool,
    pub scan_timeout_ms: u64,
    pub mtu_settle_ms: u64,
    pub requested_mtu: u16,
    pub discovery_retry_delay_ms: u64,
    pub max_discovery_retries: u32,
    pub full_reconnect_settle_ms: u64,
    pub max_full_reconnects: u32,
    pub auto_reconnect_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_address: None,
            name_hints: vec!["sdn".into()],
            auto_reconnect: true,
            scan_timeout_ms: timing::SCAN_TIMEOUT_MS,
            mtu_settle_ms: timing::MTU_SETTLE_MS,
            requested_mtu: timing::REQUESTED_MTU,
            discovery_retry_delay_ms: timing::DISCOVERY_RETRY_DELAY_MS,
            max_discovery_retries: timing::MAX_DISCOVERY_RETRIES,
            full_reconnect_settle_ms: timing::FULL_RECONNECT_SETTLE_MS,
            max_full_reconnects: timing::MAX_FULL_RECONNECTS,
            auto_reconnect_delay_ms: timing::AUTO_RECONNECT_DELAY_MS,
        }
    }
}

/// Deferred steps of the link state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkTimer {
    /// Scan window closed without a match
    ScanTimeout,
    /// Run (or retry) endpoint discovery
    ServiceDiscovery,
    /// Settle delay of a full reconnect elapsed
    FullReconnect,
    /// Delay after an unexpected drop elapsed
    AutoReconnect,
}

/// A complete message reassembled from peer notifications
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub endpoint: Uuid,
    pub payload: Bytes,
}

/// What the dispatcher needs from the control link
pub trait ControlLink {
    fn is_ready(&self) -> bool;

    /// Fragment and queue a payload to the peer; false unless ready
    fn send(&mut self, payload: &[u8]) -> bool;

    /// Start control-plane operations if the link is idle
    fn activate(&mut self);
}

/// Owns the link session and drives the radio stack
pub struct LinkSessionManager<S, T> {
    config: LinkConfig,
    stack: S,
    capabilities: Capabilities,
    timers: Timers<LinkTimer, T>,
    session: LinkSession,
    reassembler: Reassembler<Uuid>,
    auto_reconnect: bool,
}

impl<S, T> LinkSessionManager<S, T>
where
    S: RadioStack,
    T: Scheduler<LinkTimer>,
{
    /// Create a manager; the stack's capabilities are probed here, once
    pub fn new(config: LinkConfig, peer_address: Option<Address>, stack: S, scheduler: T) -> Self {
        let capabilities = stack.capabilities();
        info!(
            "[LINK] Radio stack: mtu_negotiation={} cache_refresh={}",
            capabilities.mtu_negotiation, capabilities.cache_refresh
        );

        Self {
            auto_reconnect: config.auto_reconnect,
            config,
            stack,
            capabilities,
            timers: Timers::new(scheduler),
            session: LinkSession::new(peer_address),
            reassembler: Reassembler::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.session.state
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        info!("[LINK] Auto-reconnect {}", if enabled { "enabled" } else { "disabled" });
        self.auto_reconnect = enabled;
        if !enabled && self.timers.disarm(LinkTimer::AutoReconnect) {
            self.session.reconnect_in_flight = false;
            self.transition(LinkState::Disconnected);
        }
    }

    /// Connect directly to a known peer address
    pub fn connect_to_fixed_peer(&mut self, address: Address) {
        self.session.reset_counters();
        self.begin_connect(address);
    }

    /// Scan for the peer and connect to the first match
    pub fn discover_and_connect(&mut self) {
        self.session.reset_counters();
        self.start_peer_discovery();
    }

    /// Fragment a payload and queue it to the peer's inbound endpoint
    pub fn send(&mut self, payload: &[u8]) -> bool {
        if self.session.state != LinkState::Ready {
            debug!("[LINK] Not ready ({}), dropping {} byte send", self.session.state, payload.len());
            return false;
        }

        let fragments = match fragment::encode_all(payload, self.session.frame_budget()) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("[LINK] Cannot fragment outbound message: {}", e);
                return false;
            }
        };

        debug!("[LINK] Sending {} bytes in {} fragment(s)", payload.len(), fragments.len());
        for raw in fragments {
            if let Err(e) = self.stack.write(uuids::PEER_INBOUND_WRITE, raw) {
                if e.is_fatal() {
                    self.enter_error(&format!("write refused: {}", e));
                } else {
                    warn!("[LINK] Write to peer failed: {}", e);
                }
                return false;
            }
        }
        true
    }

    /// Release the session (auto-reconnect setting is kept)
    pub fn disconnect(&mut self) {
        info!("[LINK] Disconnect requested in state {}", self.session.state);
        self.timers.disarm_all();
        self.stop_scan();
        if self.session.state.is_linked() || self.session.state == LinkState::Connecting {
            if let Err(e) = self.stack.disconnect() {
                debug!("[LINK] Disconnect call failed: {}", e);
            }
        }
        self.reassembler.clear();
        self.session.reset_connection();
        self.session.reconnect_in_flight = false;
        self.transition(LinkState::Disconnected);
    }

    /// Release everything and stay down
    pub fn teardown_everything(&mut self) {
        self.auto_reconnect = false;
        self.disconnect();
        self.stack.close();
        self.session.reset_counters();
        info!("[LINK] Torn down");
    }

    /// Single dispatch function for radio-stack callbacks
    pub fn handle_event(&mut self, event: RadioEvent) -> Option<InboundMessage> {
        match event {
            RadioEvent::LinkUp => self.on_link_up(),
            RadioEvent::LinkDown { reason } => self.on_link_down(&reason),
            RadioEvent::MtuNegotiated { mtu } => self.on_mtu_negotiated(mtu),
            RadioEvent::ServicesDiscovered { services } => self.on_services_discovered(&services),
            RadioEvent::ServiceDiscoveryFailed { reason } => {
                if self.session.state == LinkState::Discovering {
                    warn!("[LINK] Service discovery failed: {}", reason);
                    self.on_service_missing();
                }
            }
            RadioEvent::Subscribed { endpoint, ok } => self.on_subscribed(endpoint, ok),
            RadioEvent::Notification { endpoint, value } => {
                return self.on_notification(endpoint, &value);
            }
            RadioEvent::WriteCompleted { endpoint, ok } => {
                if !ok {
                    warn!("[LINK] Write to {} was not acknowledged", endpoint);
                }
            }
            RadioEvent::ScanResult(record) => self.on_scan_result(record),
            RadioEvent::ScanFailed { reason } => {
                if self.session.scanning {
                    warn!("[SCAN] Scan failed: {}", reason);
                    self.stop_scan();
                    self.connect_last_known();
                }
            }
        }
        None
    }

    /// Timer callbacks; expirations of cancelled or replaced timers are ignored
    pub fn on_timer(&mut self, fired: Fired<LinkTimer>) {
        if !self.timers.accept(&fired) {
            debug!("[LINK] Ignoring stale {:?} timer", fired.kind);
            return;
        }

        match fired.kind {
            LinkTimer::ScanTimeout => self.on_scan_timeout(),
            LinkTimer::ServiceDiscovery => self.run_service_discovery(),
            LinkTimer::FullReconnect => {
                info!("[LINK] Settle delay over, rediscovering peer");
                self.start_peer_discovery();
            }
            LinkTimer::AutoReconnect => self.on_auto_reconnect(),
        }
    }

    fn transition(&mut self, to: LinkState) {
        let from = self.session.state;
        if from == to {
            return;
        }
        if !is_valid_transition(from, to) {
            warn!("[LINK] Unexpected transition {} -> {}", from, to);
        }
        info!("[LINK] {} -> {}", from, to);
        self.session.state = to;
    }

    fn enter_error(&mut self, reason: &str) {
        error!("[LINK] {}", reason);
        self.timers.disarm_all();
        self.stop_scan();
        self.session.reconnect_in_flight = false;
        self.transition(LinkState::Error);
    }

    /// Permissions and radio power gate every attempt
    fn preflight(&mut self) -> bool {
        if !self.stack.has_permissions() {
            self.enter_error("Radio permissions unavailable, not connecting");
            return false;
        }
        if !self.stack.is_radio_enabled() {
            self.enter_error("Primary radio is off, not connecting");
            return false;
        }
        true
    }

    fn start_peer_discovery(&mut self) {
        if !self.preflight() {
            return;
        }
        self.timers.disarm(LinkTimer::AutoReconnect);
        self.timers.disarm(LinkTimer::FullReconnect);

        let filter = ScanFilter {
            services: vec![uuids::PEER_SERVICE, uuids::PERIPHERAL_SERVICE],
            name_hints: self.config.name_hints.clone(),
        };

        self.transition(LinkState::Connecting);
        match self.stack.start_scan(&filter) {
            Ok(()) => {
                self.session.scanning = true;
                self.timers.arm(
                    LinkTimer::ScanTimeout,
                    Duration::from_millis(self.config.scan_timeout_ms),
                );
                info!("[SCAN] Scanning for peer ({} ms window)", self.config.scan_timeout_ms);
            }
            Err(e) if e.is_fatal() => self.enter_error(&format!("Scan refused: {}", e)),
            Err(e) => {
                warn!("[SCAN] Scan did not start ({}), using last known address", e);
                self.connect_last_known();
            }
        }
    }

    fn stop_scan(&mut self) {
        self.timers.disarm(LinkTimer::ScanTimeout);
        if self.session.scanning {
            self.session.scanning = false;
            self.stack.stop_scan();
        }
    }

    fn connect_last_known(&mut self) {
        match self.session.peer_address {
            Some(address) => self.begin_connect(address),
            None => self.enter_error("Peer not found and no known address to fall back to"),
        }
    }

    fn begin_connect(&mut self, address: Address) {
        if !self.preflight() {
            return;
        }
        self.stop_scan();
        self.timers.disarm(LinkTimer::AutoReconnect);
        self.timers.disarm(LinkTimer::FullReconnect);

        if self.session.state.is_linked() {
            self.release_session();
            self.transition(LinkState::Disconnected);
        }

        self.session.peer_address = Some(address);
        self.session.reset_connection();
        self.reassembler.clear();
        self.transition(LinkState::Connecting);

        info!("[LINK] Connecting to {}", address);
        if let Err(e) = self.stack.connect(address) {
            if e.is_fatal() {
                self.enter_error(&format!("Connect refused: {}", e));
            } else {
                self.on_link_down(&e.to_string());
            }
        }
    }

    fn on_link_up(&mut self) {
        if self.session.state != LinkState::Connecting || self.session.scanning {
            debug!("[LINK] Ignoring link-up in state {}", self.session.state);
            return;
        }

        self.session.discovery_retries = 0;
        self.session.mtu_resolved = false;

        if self.capabilities.mtu_negotiation {
            self.transition(LinkState::MtuNegotiating);
            if let Err(e) = self.stack.request_mtu(self.config.requested_mtu) {
                if e.is_fatal() {
                    self.enter_error(&format!("MTU request refused: {}", e));
                    return;
                }
                warn!("[LINK] MTU request failed: {}", e);
                self.on_mtu_negotiated(None);
            }
        } else {
            self.transition(LinkState::Discovering);
            self.timers.arm(
                LinkTimer::ServiceDiscovery,
                Duration::from_millis(self.config.mtu_settle_ms),
            );
        }
    }

    fn on_mtu_negotiated(&mut self, mtu: Option<u16>) {
        if self.session.state != LinkState::MtuNegotiating || self.session.mtu_resolved {
            debug!("[LINK] Ignoring duplicate MTU completion ({:?})", mtu);
            return;
        }
        self.session.mtu_resolved = true;

        match mtu {
            Some(mtu) => {
                info!("[LINK] MTU negotiated: {}", mtu);
                self.session.att_mtu = mtu.max(timing::DEFAULT_ATT_MTU);
            }
            None => warn!(
                "[LINK] MTU negotiation failed, keeping {}",
                self.session.att_mtu
            ),
        }

        self.transition(LinkState::Discovering);
        self.timers.arm(
            LinkTimer::ServiceDiscovery,
            Duration::from_millis(self.config.mtu_settle_ms),
        );
    }

    fn run_service_discovery(&mut self) {
        if self.session.state != LinkState::Discovering {
            return;
        }
        debug!(
            "[LINK] Discovering services (retry {}/{})",
            self.session.discovery_retries, self.config.max_discovery_retries
        );
        if let Err(e) = self.stack.discover_services() {
            if e.is_fatal() {
                self.enter_error(&format!("Service discovery refused: {}", e));
            } else {
                warn!("[LINK] Service discovery did not start: {}", e);
                self.on_service_missing();
            }
        }
    }

    fn on_services_discovered(&mut self, services: &[DiscoveredService]) {
        if self.session.state != LinkState::Discovering
            || self.session.subscribing.is_some()
            || self.timers.is_armed(LinkTimer::ServiceDiscovery)
        {
            debug!("[LINK] Ignoring late service discovery result");
            return;
        }

        self.session.endpoints = services
            .iter()
            .flat_map(|s| std::iter::once(s.uuid).chain(s.endpoints.iter().map(|e| e.uuid)))
            .collect();

        let peer_service = services.iter().find(|s| {
            s.uuid == uuids::PEER_SERVICE && s.endpoint(uuids::PEER_INBOUND_WRITE).is_some()
        });

        match peer_service {
            Some(service) => {
                self.session.pending_subscriptions = uuids::PEER_NOTIFY_ENDPOINTS
                    .iter()
                    .copied()
                    .filter(|uuid| service.endpoint(*uuid).map_or(false, |e| e.notify))
                    .collect();
                info!(
                    "[LINK] Peer service found, {} subscription(s) queued",
                    self.session.pending_subscriptions.len()
                );
                self.subscribe_next();
            }
            None => self.on_service_missing(),
        }
    }

    fn on_service_missing(&mut self) {
        if self.session.discovery_retries < self.config.max_discovery_retries {
            self.session.discovery_retries += 1;
            info!(
                "[LINK] Peer service not found, retry {}/{}",
                self.session.discovery_retries, self.config.max_discovery_retries
            );
            self.timers.arm(
                LinkTimer::ServiceDiscovery,
                Duration::from_millis(self.config.discovery_retry_delay_ms),
            );
        } else {
            warn!(
                "[LINK] Peer service missing after {} retries, service cache looks stale; endpoints seen: {:?}",
                self.session.discovery_retries, self.session.endpoints
            );
            self.full_reconnect();
        }
    }

    fn full_reconnect(&mut self) {
        if self.session.full_reconnects >= self.config.max_full_reconnects {
            let endpoints = self.session.endpoints.clone();
            self.release_session();
            self.enter_error(&format!(
                "Peer service still missing after {} full reconnects; restart the peer's service (endpoints seen: {:?})",
                self.session.full_reconnects, endpoints
            ));
            return;
        }

        self.session.full_reconnects += 1;
        info!(
            "[LINK] Full reconnect {}/{}",
            self.session.full_reconnects, self.config.max_full_reconnects
        );
        self.release_session();
        self.transition(LinkState::Reconnecting);
        self.timers.arm(
            LinkTimer::FullReconnect,
            Duration::from_millis(self.config.full_reconnect_settle_ms),
        );
    }

    /// Drop the physical session and every cached view of it
    fn release_session(&mut self) {
        self.timers.disarm(LinkTimer::ServiceDiscovery);
        if let Err(e) = self.stack.disconnect() {
            debug!("[LINK] Disconnect call failed: {}", e);
        }
        if self.capabilities.cache_refresh {
            if let Err(e) = self.stack.refresh_cache() {
                warn!("[LINK] Service cache refresh failed: {}", e);
            }
        }
        self.stack.close();
        self.reassembler.clear();
        self.session.reset_connection();
    }

    fn subscribe_next(&mut self) {
        while let Some(endpoint) = self.session.pending_subscriptions.pop_front() {
            debug!(
                "[LINK] Subscribing to {} ({} more queued)",
                endpoint,
                self.session.pending_subscriptions.len()
            );
            match self.stack.subscribe(endpoint) {
                Ok(()) => {
                    self.session.subscribing = Some(endpoint);
                    return;
                }
                Err(e) if e.is_fatal() => {
                    self.enter_error(&format!("Subscription refused: {}", e));
                    return;
                }
                Err(e) => warn!("[LINK] Subscription to {} failed: {}", endpoint, e),
            }
        }
        self.become_ready();
    }

    fn on_subscribed(&mut self, endpoint: Uuid, ok: bool) {
        if self.session.subscribing != Some(endpoint) {
            debug!("[LINK] Ignoring unexpected subscription result for {}", endpoint);
            return;
        }
        self.session.subscribing = None;
        if !ok {
            warn!("[LINK] Peer rejected subscription to {}", endpoint);
        }
        self.subscribe_next();
    }

    fn become_ready(&mut self) {
        self.session.reset_counters();
        self.session.reconnect_in_flight = false;
        self.transition(LinkState::Ready);
        info!(
            "[LINK] Control link ready (mtu {}, {} endpoints)",
            self.session.att_mtu,
            self.session.endpoints.len()
        );
    }

    fn on_link_down(&mut self, reason: &str) {
        let state = self.session.state;
        let attempt_failed = state == LinkState::Connecting && !self.session.scanning;
        if !attempt_failed && !state.is_linked() {
            debug!("[LINK] Ignoring link-down ({}) in state {}", reason, state);
            return;
        }

        warn!("[LINK] Link to peer lost in state {}: {}", state, reason);
        self.timers.disarm(LinkTimer::ServiceDiscovery);
        self.stack.close();
        self.reassembler.clear();
        self.session.reset_connection();

        // Any accepted drop ends the attempt that was in flight
        self.session.reconnect_in_flight = false;
        self.schedule_auto_reconnect();
    }

    fn schedule_auto_reconnect(&mut self) {
        if !self.auto_reconnect || self.session.peer_address.is_none() {
            self.transition(LinkState::Disconnected);
            return;
        }
        if self.session.reconnect_in_flight {
            debug!("[LINK] Reconnect already in flight");
            return;
        }

        self.session.reconnect_in_flight = true;
        self.transition(LinkState::Reconnecting);
        self.timers.arm(
            LinkTimer::AutoReconnect,
            Duration::from_millis(self.config.auto_reconnect_delay_ms),
        );
        info!(
            "[LINK] Reconnecting in {} ms",
            self.config.auto_reconnect_delay_ms
        );
    }

    fn on_auto_reconnect(&mut self) {
        if self.session.state != LinkState::Reconnecting {
            self.session.reconnect_in_flight = false;
            return;
        }
        self.connect_last_known();
    }

    fn on_scan_result(&mut self, record: ScanRecord) {
        if record.services.contains(&uuids::PERIPHERAL_SERVICE)
            && self.session.peripherals.insert(record.address)
        {
            info!(
                "[SCAN] Peripheral peer {} ({})",
                record.address,
                record.name.as_deref().unwrap_or("unnamed")
            );
        }

        if !self.session.scanning || !self.matches_peer(&record) {
            return;
        }

        info!(
            "[SCAN] Found peer {} ({}) rssi={:?}",
            record.address,
            record.name.as_deref().unwrap_or("unnamed"),
            record.rssi
        );
        self.stop_scan();
        self.begin_connect(record.address);
    }

    fn matches_peer(&self, record: &ScanRecord) -> bool {
        if record.services.contains(&uuids::PEER_SERVICE) {
            return true;
        }
        if record.services.contains(&uuids::PERIPHERAL_SERVICE) {
            return false;
        }
        match &record.name {
            Some(name) => {
                let name = name.to_lowercase();
                self.config
                    .name_hints
                    .iter()
                    .any(|hint| !hint.is_empty() && name.contains(&hint.to_lowercase()))
            }
            None => false,
        }
    }

    fn on_scan_timeout(&mut self) {
        if !self.session.scanning {
            return;
        }
        info!("[SCAN] No peer advertised within the scan window, using last known address");
        self.stop_scan();
        self.connect_last_known();
    }

    fn on_notification(&mut self, endpoint: Uuid, value: &[u8]) -> Option<InboundMessage> {
        if !self.session.state.is_linked() {
            debug!("[LINK] Dropping notification in state {}", self.session.state);
            return None;
        }

        match self.reassembler.feed(&endpoint, value) {
            Ok(Some(payload)) => Some(InboundMessage { endpoint, payload }),
            Ok(None) => None,
            Err(e) => {
                warn!("[FRAME] Dropping fragment on {}: {}", endpoint, e);
                None
            }
        }
    }
}

impl<S, T> ControlLink for LinkSessionManager<S, T>
where
    S: RadioStack,
    T: Scheduler<LinkTimer>,
{
    fn is_ready(&self) -> bool {
        self.session.state == LinkState::Ready
    }

    fn send(&mut self, payload: &[u8]) -> bool {
        LinkSessionManager::send(self, payload)
    }

    fn activate(&mut self) {
        if self.session.state.is_idle() {
            info!("[LINK] Activating control plane");
            self.discover_and_connect();
        } else {
            debug!("[LINK] Control plane already active ({})", self.session.state);
        }
    }
}
