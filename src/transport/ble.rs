//! BlueZ-backed radio stack
//!
//! Every `RadioStack` call spawns a short tokio task against bluer and
//! returns immediately; the task reports its outcome through the event sink.
//! Writes go through a single writer task per connection so they reach the
//! peer in call order.

use super::ble_discovery::read_record;
use super::traits::{
    Capabilities, DiscoveredEndpoint, DiscoveredService, RadioError, RadioEvent, RadioStack,
    ScanFilter,
};
use crate::timer::EventSink;
use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty, ErrorKind,
};
use bytes::Bytes;
use futures::{pin_mut, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long to wait for BlueZ to resolve the remote service table
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);

/// Background work owned by the stack
///
/// Session tasks die with the connection. Release tasks (disconnect, cache
/// removal) must outlive `close()`, so they are kept apart and only awaited.
#[derive(Default)]
struct StackTasks {
    session: Vec<JoinHandle<()>>,
    releases: Vec<JoinHandle<()>>,
}

impl StackTasks {
    fn spawn_session<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.session.retain(|t| !t.is_finished());
        self.session.push(tokio::spawn(fut));
    }

    fn spawn_release<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.releases.retain(|t| !t.is_finished());
        self.releases.push(tokio::spawn(fut));
    }

    fn abort_session(&mut self) {
        for task in self.session.drain(..) {
            task.abort();
        }
    }

    /// Wait for outstanding releases; returns how many did not finish in time
    async fn drain_releases(&mut self, limit: Duration) -> usize {
        let pending: Vec<_> = self.releases.drain(..).collect();
        let total = pending.len();
        match tokio::time::timeout(limit, futures::future::join_all(pending)).await {
            Ok(_) => 0,
            Err(_) => total,
        }
    }
}

/// Map a bluer error to the radio error space
pub fn map_bluer_error(e: &bluer::Error) -> RadioError {
    match &e.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            RadioError::PermissionDenied(e.message.clone())
        }
        ErrorKind::NotReady => RadioError::RadioOff,
        ErrorKind::InProgress => RadioError::Busy,
        _ => RadioError::Stack(e.to_string()),
    }
}

/// Radio stack over the BlueZ D-Bus API
pub struct BluerStack {
    adapter: Adapter,
    sink: EventSink<RadioEvent>,
    powered: Arc<AtomicBool>,
    permitted: Arc<AtomicBool>,
    device: Option<Device>,
    characteristics: Arc<Mutex<HashMap<Uuid, Characteristic>>>,
    writer: Option<mpsc::UnboundedSender<(Uuid, Characteristic, Bytes)>>,
    tasks: StackTasks,
    scan_task: Option<JoinHandle<()>>,
    power_task: JoinHandle<()>,
}

impl BluerStack {
    /// Wrap an adapter; starts watching its power state
    pub async fn new(adapter: Adapter, sink: EventSink<RadioEvent>) -> bluer::Result<Self> {
        let powered = Arc::new(AtomicBool::new(adapter.is_powered().await?));
        let events = adapter.events().await?;

        let watch = powered.clone();
        let power_task = tokio::spawn(async move {
            pin_mut!(events);
            while let Some(evt) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = evt {
                    info!("[BT] Adapter powered {}", if on { "on" } else { "off" });
                    watch.store(on, Ordering::SeqCst);
                }
            }
        });

        Ok(Self {
            adapter,
            sink,
            powered,
            permitted: Arc::new(AtomicBool::new(true)),
            device: None,
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            writer: None,
            tasks: StackTasks::default(),
            scan_task: None,
            power_task,
        })
    }

    /// Snapshot of the adapter power flag, shared with the radio plane
    pub fn powered_flag(&self) -> Arc<AtomicBool> {
        self.powered.clone()
    }

    fn current_device(&self) -> Result<Device, RadioError> {
        self.device.clone().ok_or(RadioError::NotConnected)
    }

    fn characteristic(&self, endpoint: Uuid) -> Result<Characteristic, RadioError> {
        let map = self
            .characteristics
            .lock()
            .map_err(|_| RadioError::Stack("characteristic table poisoned".into()))?;
        map.get(&endpoint)
            .cloned()
            .ok_or(RadioError::UnknownEndpoint(endpoint))
    }

    fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn_session(fut);
    }

    /// Wait for pending disconnect and cache removal calls to reach BlueZ
    pub async fn wait_released(&mut self, limit: Duration) {
        let unfinished = self.tasks.drain_releases(limit).await;
        if unfinished > 0 {
            warn!("[BT] {} release call(s) still running at shutdown", unfinished);
        }
    }

    /// Record permission failures so later preflight checks see them
    fn note_error(permitted: &AtomicBool, e: &bluer::Error) -> RadioError {
        let mapped = map_bluer_error(e);
        if matches!(mapped, RadioError::PermissionDenied(_)) {
            permitted.store(false, Ordering::SeqCst);
        }
        mapped
    }

    fn start_writer(&mut self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Uuid, Characteristic, Bytes)>();
        let sink = self.sink.clone();
        let permitted = self.permitted.clone();
        self.spawn(async move {
            while let Some((endpoint, characteristic, value)) = rx.recv().await {
                let ok = match characteristic.write(&value).await {
                    Ok(()) => true,
                    Err(e) => {
                        let mapped = Self::note_error(&permitted, &e);
                        warn!("[BT] Write to {} failed: {}", endpoint, mapped);
                        false
                    }
                };
                sink(RadioEvent::WriteCompleted { endpoint, ok });
            }
        });
        self.writer = Some(tx);
    }
}

async fn wait_services_resolved(device: &Device) -> bluer::Result<bool> {
    let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
    loop {
        if device.is_services_resolved().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
    }
}

async fn collect_services(
    device: &Device,
) -> bluer::Result<(Vec<DiscoveredService>, HashMap<Uuid, Characteristic>)> {
    let mut services = Vec::new();
    let mut table = HashMap::new();

    for service in device.services().await? {
        let mut endpoints = Vec::new();
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            let flags = characteristic.flags().await?;
            endpoints.push(DiscoveredEndpoint {
                uuid,
                notify: flags.notify || flags.indicate,
                write: flags.write || flags.write_without_response,
            });
            table.insert(uuid, characteristic);
        }
        services.push(DiscoveredService {
            uuid: service.uuid().await?,
            endpoints,
        });
    }

    Ok((services, table))
}

impl RadioStack for BluerStack {
    fn capabilities(&self) -> Capabilities {
        // BlueZ exchanges the MTU itself; the request only reads back the result
        Capabilities {
            mtu_negotiation: true,
            cache_refresh: true,
        }
    }

    fn has_permissions(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    fn is_radio_enabled(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    fn connect(&mut self, address: Address) -> Result<(), RadioError> {
        let device = self
            .adapter
            .device(address)
            .map_err(|e| Self::note_error(&self.permitted, &e))?;
        self.device = Some(device.clone());
        self.start_writer();

        let sink = self.sink.clone();
        let permitted = self.permitted.clone();
        self.spawn(async move {
            if let Err(e) = device.connect().await {
                let mapped = Self::note_error(&permitted, &e);
                sink(RadioEvent::LinkDown {
                    reason: mapped.to_string(),
                });
                return;
            }
            info!("[BT] Link up to {}", device.address());

            let events = match device.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("[BT] Cannot watch {}: {}", device.address(), e);
                    sink(RadioEvent::LinkUp);
                    return;
                }
            };
            sink(RadioEvent::LinkUp);

            pin_mut!(events);
            while let Some(evt) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = evt {
                    sink(RadioEvent::LinkDown {
                        reason: "peer disconnected".into(),
                    });
                    break;
                }
            }
        });
        Ok(())
    }

    fn request_mtu(&mut self, _mtu: u16) -> Result<(), RadioError> {
        let device = self.current_device()?;
        let sink = self.sink.clone();
        self.spawn(async move {
            let mtu = async {
                if !wait_services_resolved(&device).await? {
                    return Ok::<_, bluer::Error>(None);
                }
                let (_, table) = collect_services(&device).await?;
                let writable = match table.get(&fieldlink_shared::uuids::PEER_INBOUND_WRITE) {
                    Some(characteristic) => characteristic.clone(),
                    None => return Ok(None),
                };
                // Acquiring the write socket reports the exchanged ATT MTU
                let io = writable.write_io().await?;
                Ok(u16::try_from(io.mtu()).ok())
            }
            .await;

            let mtu = match mtu {
                Ok(mtu) => mtu,
                Err(e) => {
                    debug!("[BT] MTU readback failed: {}", e);
                    None
                }
            };
            sink(RadioEvent::MtuNegotiated { mtu });
        });
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), RadioError> {
        let device = self.current_device()?;
        let sink = self.sink.clone();
        let table = self.characteristics.clone();
        self.spawn(async move {
            let result = async {
                if !wait_services_resolved(&device).await? {
                    return Ok::<_, bluer::Error>(None);
                }
                collect_services(&device).await.map(Some)
            }
            .await;

            match result {
                Ok(Some((services, characteristics))) => {
                    if let Ok(mut map) = table.lock() {
                        *map = characteristics;
                    }
                    sink(RadioEvent::ServicesDiscovered { services });
                }
                Ok(None) => sink(RadioEvent::ServiceDiscoveryFailed {
                    reason: "services not resolved in time".into(),
                }),
                Err(e) => sink(RadioEvent::ServiceDiscoveryFailed {
                    reason: map_bluer_error(&e).to_string(),
                }),
            }
        });
        Ok(())
    }

    fn subscribe(&mut self, endpoint: Uuid) -> Result<(), RadioError> {
        let characteristic = self.characteristic(endpoint)?;
        let sink = self.sink.clone();
        let permitted = self.permitted.clone();
        self.spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    let mapped = Self::note_error(&permitted, &e);
                    warn!("[BT] Subscribe to {} failed: {}", endpoint, mapped);
                    sink(RadioEvent::Subscribed { endpoint, ok: false });
                    return;
                }
            };
            sink(RadioEvent::Subscribed { endpoint, ok: true });

            pin_mut!(stream);
            while let Some(value) = stream.next().await {
                sink(RadioEvent::Notification {
                    endpoint,
                    value: Bytes::from(value),
                });
            }
            debug!("[BT] Notification stream for {} ended", endpoint);
        });
        Ok(())
    }

    fn write(&mut self, endpoint: Uuid, value: Bytes) -> Result<(), RadioError> {
        let characteristic = self.characteristic(endpoint)?;
        let writer = self.writer.as_ref().ok_or(RadioError::NotConnected)?;
        writer
            .send((endpoint, characteristic, value))
            .map_err(|_| RadioError::NotConnected)
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        let device = self.current_device()?;
        self.tasks.spawn_release(async move {
            if let Err(e) = device.disconnect().await {
                debug!("[BT] Disconnect from {} failed: {}", device.address(), e);
            }
        });
        Ok(())
    }

    fn refresh_cache(&mut self) -> Result<(), RadioError> {
        let device = self.current_device()?;
        let adapter = self.adapter.clone();
        self.tasks.spawn_release(async move {
            let address = device.address();
            match adapter.remove_device(address).await {
                Ok(()) => info!("[BT] Cleared cached services of {}", address),
                Err(e) => warn!("[BT] Cache refresh for {} failed: {}", address, e),
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        self.tasks.abort_session();
        self.writer = None;
        self.device = None;
        if let Ok(mut map) = self.characteristics.lock() {
            map.clear();
        }
    }

    fn start_scan(&mut self, filter: &ScanFilter) -> Result<(), RadioError> {
        if !self.is_radio_enabled() {
            return Err(RadioError::RadioOff);
        }
        self.stop_scan();

        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let permitted = self.permitted.clone();
        let wanted: HashSet<Uuid> = filter.services.iter().copied().collect();
        let name_hints: Vec<String> = filter.name_hints.iter().map(|h| h.to_lowercase()).collect();

        self.scan_task = Some(tokio::spawn(async move {
            let discover = match adapter.discover_devices().await {
                Ok(stream) => stream,
                Err(e) => {
                    let mapped = Self::note_error(&permitted, &e);
                    sink(RadioEvent::ScanFailed {
                        reason: mapped.to_string(),
                    });
                    return;
                }
            };
            pin_mut!(discover);

            let mut seen = HashSet::new();
            while let Some(evt) = discover.next().await {
                let addr = match evt {
                    AdapterEvent::DeviceAdded(addr) => addr,
                    _ => continue,
                };
                if !seen.insert(addr) {
                    continue;
                }
                let Ok(device) = adapter.device(addr) else {
                    continue;
                };
                let record = read_record(&device).await;
                let by_service = record.services.iter().any(|u| wanted.contains(u));
                let by_name = record.name.as_ref().map_or(false, |n| {
                    let n = n.to_lowercase();
                    name_hints.iter().any(|h| !h.is_empty() && n.contains(h))
                });
                if by_service || by_name {
                    sink(RadioEvent::ScanResult(record));
                }
            }
            sink(RadioEvent::ScanFailed {
                reason: "discovery stream ended".into(),
            });
        }));
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }
}

impl Drop for BluerStack {
    fn drop(&mut self) {
        self.close();
        self.stop_scan();
        self.power_task.abort();
    }
}
