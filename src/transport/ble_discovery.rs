//! One-shot BLE scan used by the `scan` subcommand and by the stack's scan task

use super::traits::ScanRecord;
use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Address, Device};
use fieldlink_shared::uuids;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Configuration for a one-shot scan
#[derive(Debug, Clone)]
pub struct PeerDiscoveryConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// Name fragments that mark a device as a candidate peer
    pub name_hints: Vec<String>,
    /// Report every device, not only candidates
    pub show_all: bool,
}

impl Default for PeerDiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            name_hints: vec!["sdn".into()],
            show_all: false,
        }
    }
}

/// Get the default adapter, powering it on
pub async fn get_adapter() -> Result<Adapter> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!("[BT] Using adapter {}", adapter.name());
    Ok(adapter)
}

/// Read the advertisement data BlueZ has cached for a device
pub async fn read_record(device: &Device) -> ScanRecord {
    ScanRecord {
        address: device.address(),
        name: device.name().await.ok().flatten(),
        services: device
            .uuids()
            .await
            .ok()
            .flatten()
            .map(|set| set.into_iter().collect())
            .unwrap_or_default(),
        rssi: device.rssi().await.ok().flatten(),
    }
}

/// Whether a record looks like the peer or one of its peripherals
pub fn is_candidate(record: &ScanRecord, name_hints: &[String]) -> bool {
    if record.services.contains(&uuids::PEER_SERVICE)
        || record.services.contains(&uuids::PERIPHERAL_SERVICE)
    {
        return true;
    }
    let name = match &record.name {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    name_hints
        .iter()
        .any(|hint| !hint.is_empty() && name.contains(&hint.to_lowercase()))
}

/// Device discovery for locating the peer
pub struct PeerDiscovery {
    config: PeerDiscoveryConfig,
}

impl PeerDiscovery {
    pub fn new(config: PeerDiscoveryConfig) -> Self {
        Self { config }
    }

    /// Scan for the configured duration, strongest signal first
    pub async fn scan(&self, adapter: &Adapter) -> Result<Vec<ScanRecord>> {
        let mut found = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        let discover = adapter.discover_devices().await?;
        tokio::pin!(discover);

        let scan_result = timeout(self.config.scan_duration, async {
            while let Some(evt) = discover.next().await {
                let addr = match evt {
                    AdapterEvent::DeviceAdded(addr) => addr,
                    _ => continue,
                };
                if !seen.insert(addr) {
                    continue;
                }
                let device = match adapter.device(addr) {
                    Ok(device) => device,
                    Err(e) => {
                        debug!("[BT] Cannot open {}: {}", addr, e);
                        continue;
                    }
                };
                let record = read_record(&device).await;
                if self.config.show_all || is_candidate(&record, &self.config.name_hints) {
                    found.push(record);
                }
            }
        })
        .await;

        // Timeout is expected, not an error
        if scan_result.is_err() {
            info!("[BT] Discovery scan completed");
        }

        sort_by_signal(&mut found);
        Ok(found)
    }
}

/// Strongest signal first; unknown RSSI last
pub fn sort_by_signal(records: &mut [ScanRecord]) {
    records.sort_by(|a, b| {
        let rssi_a = a.rssi.unwrap_or(i16::MIN);
        let rssi_b = b.rssi.unwrap_or(i16::MIN);
        rssi_b.cmp(&rssi_a)
    });
}
