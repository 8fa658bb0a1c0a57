//! Local-network peer discovery over mDNS.
//!
//! Advertises this device under the Haven service type and browses for
//! others. Discovery is best-effort: malformed announcements and
//! per-event errors are logged and skipped, never fatal, so a browse
//! always returns whatever was found. Cached entries expire after a TTL
//! so vanished devices do not linger.

use crate::error::{SyncError, SyncResult};
use crate::protocol::PROTOCOL_VERSION;
use haven_types::{now_ms, Device, DeviceId, DeviceType};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Well-known mDNS service type for Haven sync.
pub const SERVICE_TYPE: &str = "_haven-sync._tcp.local.";

/// Default browse window for one discovery pass.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

/// How long a discovered device stays cached without being re-seen.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(300);

/// A device found on the local network.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub device_id: DeviceId,
    pub display_name: String,
    pub device_type: DeviceType,
    pub address: IpAddr,
    pub port: u16,
    last_seen: Instant,
}

impl DiscoveredDevice {
    /// Converts to a persistable device record.
    #[must_use]
    pub fn to_device(&self) -> Device {
        Device::discovered(
            self.device_id,
            self.display_name.clone(),
            self.device_type,
            self.address.to_string(),
            self.port,
            now_ms(),
        )
    }
}

/// Advertises this device and browses for peers.
///
/// `discover_devices` blocks for the browse window; on an async runtime
/// call it through `tokio::task::spawn_blocking`.
pub struct PeerDiscovery {
    daemon: ServiceDaemon,
    local: Device,
    registered_fullname: Option<String>,
    cache: Mutex<HashMap<DeviceId, DiscoveredDevice>>,
    ttl: Duration,
}

impl PeerDiscovery {
    /// Creates a discovery handle for the local device.
    pub fn new(local: Device) -> SyncResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| SyncError::Discovery(format!("failed to start mDNS daemon: {e}")))?;
        Ok(Self {
            daemon,
            local,
            registered_fullname: None,
            cache: Mutex::new(HashMap::new()),
            ttl: DEFAULT_PEER_TTL,
        })
    }

    /// Overrides the stale-entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Starts advertising this device.
    pub fn advertise(&mut self) -> SyncResult<()> {
        let instance = format!("haven-{}", self.local.device_id);
        let hostname = format!("{instance}.local.");
        let properties = HashMap::from([
            ("device_id".to_string(), self.local.device_id.to_string()),
            ("device_name".to_string(), self.local.display_name.clone()),
            (
                "device_type".to_string(),
                self.local.device_type.as_str().to_string(),
            ),
            ("protocol".to_string(), PROTOCOL_VERSION.to_string()),
        ]);

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &hostname,
            "",
            self.local.port,
            properties,
        )
        .map_err(|e| SyncError::Discovery(format!("invalid service info: {e}")))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        self.daemon
            .register(service)
            .map_err(|e| SyncError::Discovery(format!("mDNS register failed: {e}")))?;
        self.registered_fullname = Some(fullname);
        info!(device = %self.local.device_id, port = self.local.port, "advertising on local network");
        Ok(())
    }

    /// Browses for peers for the given window and returns the
    /// deduplicated, TTL-filtered result. Partial results are returned
    /// even when individual events fail to parse.
    pub fn discover_devices(&self, window: Duration) -> SyncResult<Vec<DiscoveredDevice>> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| SyncError::Discovery(format!("mDNS browse failed: {e}")))?;

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(service)) => self.note_resolved(&service),
                Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                    debug!(%fullname, "peer announcement removed");
                }
                Ok(_) => {}
                Err(_) => break, // window elapsed
            }
        }
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            debug!("stop_browse: {e}");
        }

        let mut cache = self.cache.lock().expect("discovery cache poisoned");
        cache.retain(|_, device| device.last_seen.elapsed() < self.ttl);

        let mut devices: Vec<_> = cache.values().cloned().collect();
        devices.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        debug!(count = devices.len(), "discovery pass finished");
        Ok(devices)
    }

    fn note_resolved(&self, service: &ServiceInfo) {
        let properties: HashMap<String, String> = service
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect();
        let Some(address) = service.get_addresses().iter().next().copied() else {
            warn!(fullname = %service.get_fullname(), "resolved service without address");
            return;
        };

        match device_from_announcement(&properties, address, service.get_port()) {
            Some(device) if device.device_id == self.local.device_id => {}
            Some(device) => {
                debug!(peer = %device.device_id, %address, "discovered peer");
                self.cache
                    .lock()
                    .expect("discovery cache poisoned")
                    .insert(device.device_id, device);
            }
            None => {
                warn!(fullname = %service.get_fullname(), "ignoring malformed announcement");
            }
        }
    }

    /// Stops advertising and shuts the daemon down.
    pub fn shutdown(&mut self) {
        if let Some(fullname) = self.registered_fullname.take() {
            if let Err(e) = self.daemon.unregister(&fullname) {
                debug!("unregister: {e}");
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS shutdown: {e}");
        }
    }
}

/// Parses a peer announcement's TXT properties. Returns `None` when
/// required keys are missing or malformed.
fn device_from_announcement(
    properties: &HashMap<String, String>,
    address: IpAddr,
    port: u16,
) -> Option<DiscoveredDevice> {
    let device_id: DeviceId = properties.get("device_id")?.parse().ok()?;
    let display_name = properties.get("device_name")?.clone();
    let device_type = DeviceType::parse(properties.get("device_type")?.as_str())?;

    Some(DiscoveredDevice {
        device_id,
        display_name,
        device_type,
        address,
        port,
        last_seen: Instant::now(),
    })
}
