use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{SharedStore, keys};
use crate::config::Settings;
use crate::device::Device;
use crate::discovery::MdnsBrowser;
use crate::error::Result;
use crate::monitor::{MonitorEvent, MulticastMonitor};
use crate::registry::Registry;

const GC_INTERVAL: Duration = Duration::from_secs(1);

/// The long-running side of the system: continuous discovery, the
/// multicast monitor, and a registry kept fresh by heartbeats.
///
/// Discovery threads and monitor threads feed the registry; this task
/// enumerates each newly-seen device once, re-runs the rx enumeration
/// when the monitor reports a routing change, and garbage-collects
/// devices whose heartbeats stop.
pub struct NetaudioDaemon {
    registry: Arc<Registry>,
    browser: MdnsBrowser,
    monitor: MulticastMonitor,
    events: Option<mpsc::Receiver<MonitorEvent>>,
    running: Arc<AtomicBool>,
    shared_store: Option<Arc<dyn SharedStore>>,
    enumerated: HashSet<String>,
}

impl NetaudioDaemon {
    pub fn new(settings: &Settings) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let browser = MdnsBrowser::new(settings.mdns_timeout())?;
        let (monitor, events) = MulticastMonitor::new(registry.clone(), settings.metering_port);

        Ok(Self {
            registry,
            browser,
            monitor,
            events: Some(events),
            running: Arc::new(AtomicBool::new(false)),
            shared_store: None,
            enumerated: HashSet::new(),
        })
    }

    /// Mirror live device state into an external hash-map store so other
    /// processes can read it.
    pub fn with_shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared_store = Some(store);
        self
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Handle for signalling shutdown from another task or a signal
    /// handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs until [`NetaudioDaemon::stop`] is called (or the stop handle
    /// is cleared).
    pub async fn run(&mut self) -> Result<()> {
        let mut events = self.events.take().ok_or_else(|| {
            crate::error::NetaudioError::Precondition("daemon was already run".into())
        })?;
        self.running.store(true, Ordering::SeqCst);

        let browser_threads = self.browser.start(self.registry.clone())?;
        self.monitor.start()?;
        info!("daemon running");

        let mut gc = tokio::time::interval(GC_INTERVAL);
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = gc.tick() => {
                    self.enumerate_new_devices().await;
                    self.collect_stale();
                }
                event = events.recv() => match event {
                    Some(MonitorEvent::RoutingChanged { server_name }) => {
                        self.refresh_routing(&server_name).await;
                    }
                    None => break,
                },
            }
        }

        self.monitor.shutdown();
        self.browser.shutdown();
        for handle in browser_threads {
            let _ = handle.join();
        }
        info!("daemon stopped");
        Ok(())
    }

    /// One enumeration per newly-seen device. A device that returns after
    /// garbage collection is enumerated again.
    async fn enumerate_new_devices(&mut self) {
        for (server_name, handle) in self.registry.devices() {
            if self.enumerated.contains(&server_name) {
                continue;
            }
            self.enumerated.insert(server_name.clone());

            let mut device = handle.lock().await;
            debug!("{}: initial enumeration", server_name);
            if let Err(e) = device.get_controls().await {
                warn!("{}: enumeration failed: {}", server_name, e);
            }
            self.publish(&device);
        }
    }

    /// Re-runs the rx scan after a change event invalidated the map. The
    /// device mutex serializes this behind any in-flight enumeration.
    async fn refresh_routing(&mut self, server_name: &str) {
        let Some(handle) = self.registry.get(server_name) else {
            return;
        };

        let mut device = handle.lock().await;
        debug!("{}: re-reading rx channels after change event", server_name);
        device.get_rx_channels().await;
        self.publish(&device);
    }

    fn collect_stale(&mut self) {
        for server_name in self.registry.collect_stale() {
            self.enumerated.remove(&server_name);

            if let Some(store) = &self.shared_store {
                let _ = store.delete(&keys::device(&server_name));
                let _ = store.delete(&keys::server(&server_name));
                let _ = store.set_remove(&keys::servers(), &server_name);
            }
        }
    }

    fn publish(&self, device: &Device) {
        if let Some(store) = &self.shared_store {
            publish_device(store.as_ref(), device);
        }
    }
}

/// Mirrors one device's headline state into the shared store under the
/// `netaudio:dante:*` key layout. Store failures are logged and ignored;
/// the store is an optional convenience, not a dependency.
fn publish_device(store: &dyn SharedStore, device: &Device) {
    let server_name = device.server_name();
    let mut fields = vec![
        ("server_name", server_name.to_string()),
        ("name", device.name.clone()),
        ("rx_channel_count", device.rx_count_raw.to_string()),
        ("tx_channel_count", device.tx_count_raw.to_string()),
    ];
    if let Some(ipv4) = device.ipv4() {
        fields.push(("ipv4", ipv4.to_string()));
    }

    let publish = || -> Result<()> {
        store.hash_set(&keys::device(server_name), &fields)?;
        store.set_add(&keys::servers(), server_name)?;
        if let Some(ipv4) = device.ipv4() {
            store.hash_set(
                &keys::host(ipv4),
                &[("ipv4", ipv4.to_string()), ("server_name", server_name.to_string())],
            )?;
            store.set_add(&keys::hosts(), &ipv4.to_string())?;
        }
        Ok(())
    };

    if let Err(e) = publish() {
        debug!("shared store unavailable: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingStore {
        hashes: Mutex<HashMap<String, HashMap<String, String>>>,
        sets: Mutex<HashMap<String, HashSet<String>>>,
    }

    impl SharedStore for RecordingStore {
        fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
            let mut hashes = self.hashes.lock();
            let entry = hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                entry.insert((*field).to_string(), value.clone());
            }
            Ok(())
        }

        fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
            Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
        }

        fn set_add(&self, key: &str, member: &str) -> Result<()> {
            self.sets.lock().entry(key.to_string()).or_default().insert(member.to_string());
            Ok(())
        }

        fn set_remove(&self, key: &str, member: &str) -> Result<()> {
            if let Some(set) = self.sets.lock().get_mut(key) {
                set.remove(member);
            }
            Ok(())
        }

        fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.hashes.lock().remove(key);
            self.sets.lock().remove(key);
            Ok(())
        }
    }

    #[test]
    fn publish_writes_the_documented_key_layout() {
        let store = RecordingStore::default();

        let mut device = Device::new("lx-dante.local.");
        device.name = "lx-dante".into();
        device.set_ipv4(std::net::Ipv4Addr::new(192, 168, 1, 108));
        device.rx_count_raw = 128;
        device.tx_count_raw = 128;

        publish_device(&store, &device);

        let hash = store.hash_get_all("netaudio:dante:device:lx-dante.local.").unwrap();
        assert_eq!(hash["name"], "lx-dante");
        assert_eq!(hash["rx_channel_count"], "128");

        let host = store.hash_get_all("netaudio:dante:host:192.168.1.108").unwrap();
        assert_eq!(host["server_name"], "lx-dante.local.");
        assert!(store.sets.lock()["netaudio:dante:servers"].contains("lx-dante.local."));
    }
}
