//! Radio stack abstraction for the control link
//!
//! The link session manager drives the radio through this interface and
//! never awaits it: every call only starts an operation, and the outcome
//! comes back later as a `RadioEvent` on the agent event loop. Which optional
//! operations a stack supports is probed once, at construction, through
//! `capabilities()`.

use bluer::Address;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

/// Failure starting a radio operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("radio is powered off")]
    RadioOff,

    #[error("radio stack busy")]
    Busy,

    #[error("no active connection")]
    NotConnected,

    #[error("endpoint {0} not discovered")]
    UnknownEndpoint(Uuid),

    #[error("radio stack failure: {0}")]
    Stack(String),
}

impl RadioError {
    /// Errors that retrying cannot fix without outside help
    pub fn is_fatal(&self) -> bool {
        matches!(self, RadioError::PermissionDenied(_) | RadioError::RadioOff)
    }
}

/// Optional operations supported by a radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Stack can negotiate a larger ATT MTU
    pub mtu_negotiation: bool,
    /// Stack can purge its cached view of a peer's services
    pub cache_refresh: bool,
}

/// What a peer scan is looking for
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Advertised services of interest
    pub services: Vec<Uuid>,
    /// Case-insensitive name fragments used when a peer does not advertise its service
    pub name_hints: Vec<String>,
}

/// One advertisement seen during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub address: Address,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

/// A characteristic exposed by a discovered service
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredEndpoint {
    pub uuid: Uuid,
    pub notify: bool,
    pub write: bool,
}

/// A service exposed by the connected peer
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub endpoints: Vec<DiscoveredEndpoint>,
}

impl DiscoveredService {
    pub fn endpoint(&self, uuid: Uuid) -> Option<&DiscoveredEndpoint> {
        self.endpoints.iter().find(|e| e.uuid == uuid)
    }
}

/// Asynchronous outcome reported by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Low-level link to the peer is up
    LinkUp,
    /// Link dropped or a connection attempt failed
    LinkDown { reason: String },
    /// Frame size negotiation finished; `None` means it failed
    MtuNegotiated { mtu: Option<u16> },
    /// Service discovery finished
    ServicesDiscovered { services: Vec<DiscoveredService> },
    /// Service discovery could not run
    ServiceDiscoveryFailed { reason: String },
    /// Notification subscription (descriptor write) finished
    Subscribed { endpoint: Uuid, ok: bool },
    /// Raw notification value from the peer
    Notification { endpoint: Uuid, value: Bytes },
    /// Write to the peer finished
    WriteCompleted { endpoint: Uuid, ok: bool },
    /// Advertisement seen by an active scan
    ScanResult(ScanRecord),
    /// Scan could not continue
    ScanFailed { reason: String },
}

/// Fire-and-forget control over the local radio stack
pub trait RadioStack: Send {
    /// Optional operations, probed once
    fn capabilities(&self) -> Capabilities;

    /// Whether the process may use the radio at all
    fn has_permissions(&self) -> bool;

    /// Whether the primary radio is powered; this trait can only observe it
    fn is_radio_enabled(&self) -> bool;

    fn connect(&mut self, address: Address) -> Result<(), RadioError>;

    fn request_mtu(&mut self, mtu: u16) -> Result<(), RadioError>;

    fn discover_services(&mut self) -> Result<(), RadioError>;

    /// Enable notifications on one endpoint
    fn subscribe(&mut self, endpoint: Uuid) -> Result<(), RadioError>;

    /// Queue a write; writes to the peer are delivered in call order
    fn write(&mut self, endpoint: Uuid, value: Bytes) -> Result<(), RadioError>;

    fn disconnect(&mut self) -> Result<(), RadioError>;

    /// Forget the cached service table of the current peer
    fn refresh_cache(&mut self) -> Result<(), RadioError>;

    /// Release every resource held for the current peer
    fn close(&mut self);

    fn start_scan(&mut self, filter: &ScanFilter) -> Result<(), RadioError>;

    fn stop_scan(&mut self);
}
