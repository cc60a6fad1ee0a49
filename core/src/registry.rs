use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::device::{Device, ServiceEndpoint};

/// Shared handle to one live device. The tokio mutex serializes the
/// device's request/response operations; monitor threads take it with
/// `blocking_lock`.
pub type DeviceHandle = Arc<Mutex<Device>>;

#[derive(Debug, Clone, Copy)]
struct Freshness {
    last_seen: Instant,
    ttl: Duration,
}

/// Process-wide mapping from mDNS server name to device.
///
/// A device is created on the first sighting of any of its services and
/// enriched as further services resolve. Removing a device's last service
/// removes the device. The side map from IPv4 to server name serves the
/// multicast monitor, which only sees source addresses.
#[derive(Default)]
pub struct Registry {
    devices: RwLock<HashMap<String, DeviceHandle>>,
    hosts: RwLock<HashMap<Ipv4Addr, String>>,
    freshness: RwLock<HashMap<String, Freshness>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn get(&self, server_name: &str) -> Option<DeviceHandle> {
        self.devices.read().get(server_name).cloned()
    }

    pub fn by_ipv4(&self, ipv4: Ipv4Addr) -> Option<DeviceHandle> {
        let server_name = self.hosts.read().get(&ipv4).cloned()?;
        self.get(&server_name)
    }

    pub fn server_name_for(&self, ipv4: Ipv4Addr) -> Option<String> {
        self.hosts.read().get(&ipv4).cloned()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    pub fn devices(&self) -> Vec<(String, DeviceHandle)> {
        self.devices
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }

    /// Attaches a resolved service to its device, creating the device on
    /// first sighting. Property enrichment mirrors what the service
    /// advertises: MAC from the control-monitoring `id`, model id, sample
    /// rate, latency, and the software-endpoint tag.
    ///
    /// Must not be called from an async context; discovery runs on its own
    /// thread.
    pub fn upsert_service(&self, server_name: &str, endpoint: ServiceEndpoint) -> DeviceHandle {
        let handle = {
            let mut devices = self.devices.write();
            devices
                .entry(server_name.to_string())
                .or_insert_with(|| {
                    info!("new device {}", server_name);
                    Arc::new(Mutex::new(Device::new(server_name)))
                })
                .clone()
        };

        self.hosts
            .write()
            .insert(endpoint.ipv4, server_name.to_string());

        debug!(
            "{}: service {} at {}:{}",
            server_name, endpoint.name, endpoint.ipv4, endpoint.port
        );
        handle.blocking_lock().attach_service(endpoint);

        handle
    }

    /// Detaches a service instance by name. The owning device survives
    /// until its last service is gone.
    ///
    /// Must not be called from an async context.
    pub fn remove_service_instance(&self, instance_name: &str) -> Option<String> {
        let devices = self.devices.read();
        let mut owner = None;

        for (server_name, handle) in devices.iter() {
            let mut device = handle.blocking_lock();
            if device.services.remove(instance_name).is_some() {
                owner = Some((server_name.clone(), device.services.is_empty()));
                break;
            }
        }
        drop(devices);

        let (server_name, now_empty) = owner?;
        if now_empty {
            info!("{}: last service removed, dropping device", server_name);
            self.remove_device(&server_name);
        } else {
            debug!("{}: service {} removed", server_name, instance_name);
        }
        Some(server_name)
    }

    pub fn remove_device(&self, server_name: &str) {
        self.devices.write().remove(server_name);
        self.freshness.write().remove(server_name);
        self.hosts.write().retain(|_, name| name != server_name);
    }

    /// Heartbeat path: refresh the device's freshness deadline.
    pub fn touch_ipv4(&self, ipv4: Ipv4Addr, ttl: Duration) {
        if let Some(server_name) = self.server_name_for(ipv4) {
            self.freshness.write().insert(
                server_name,
                Freshness {
                    last_seen: Instant::now(),
                    ttl,
                },
            );
        }
    }

    /// Removes devices whose heartbeat deadline elapsed. Devices that
    /// never reported a heartbeat are left alone.
    pub fn collect_stale(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .freshness
            .read()
            .iter()
            .filter(|(_, freshness)| now.duration_since(freshness.last_seen) > freshness.ttl)
            .map(|(name, _)| name.clone())
            .collect();

        for server_name in &expired {
            info!("{}: heartbeat lost, removing", server_name);
            self.remove_device(server_name);
        }
        expired
    }
}
