//! Control link to the fixed peer
//!
//! This module handles:
//! - Scanning for the peer, with a last-known-address fallback
//! - Connection, MTU negotiation and endpoint discovery
//! - Bounded recovery from stale service caches
//! - Automatic reconnection after unexpected drops
//! - Fragmenting outbound messages and reassembling notifications

mod manager;
mod session;

pub use manager::{ControlLink, InboundMessage, LinkConfig, LinkSessionManager, LinkTimer};
pub use session::LinkSession;

#[cfg(test)]
pub(crate) use manager::tests as test_support;
