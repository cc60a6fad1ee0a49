use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::device::{Device, ServiceEndpoint};
use crate::error::Result;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
pub const CACHE_FILENAME: &str = "netaudio_mdns_cache.json";

/// What discovery learned about one device, enough to skip the mDNS
/// window on the next invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub services: HashMap<String, ServiceEndpoint>,
}

impl DeviceSnapshot {
    pub fn of(device: &Device) -> Self {
        Self {
            ipv4: device.ipv4(),
            name: (!device.name.is_empty()).then(|| device.name.clone()),
            model_id: (!device.model_id.is_empty()).then(|| device.model_id.clone()),
            model_name: (!device.model.is_empty()).then(|| device.model.clone()),
            manufacturer: (!device.manufacturer.is_empty()).then(|| device.manufacturer.clone()),
            services: device.services.clone(),
        }
    }

    /// Rebuilds a device shell from the snapshot; channel state still
    /// comes from a live enumeration.
    pub fn into_device(self, server_name: &str) -> Device {
        let mut device = Device::new(server_name);
        if let Some(ipv4) = self.ipv4 {
            device.set_ipv4(ipv4);
        }
        device.name = self.name.unwrap_or_default();
        device.model_id = self.model_id.unwrap_or_default();
        device.model = self.model_name.unwrap_or_default();
        device.manufacturer = self.manufacturer.unwrap_or_default();
        device.services = self.services;
        device
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// TTL-bounded discovery cache in a single JSON file.
///
/// Every write flushes the whole document, so concurrent readers always
/// see the last committed state. Entries past their TTL, and entries
/// whose stored shape is broken, are deleted the first time they are
/// read.
pub struct MdnsCache {
    path: PathBuf,
    ttl: Duration,
    entries: serde_json::Map<String, Value>,
}

impl MdnsCache {
    /// Opens (or creates) the cache file. `cache_dir` defaults to the
    /// system temp directory; the filename is fixed.
    pub fn open(ttl: Duration, cache_dir: Option<&Path>) -> Result<Self> {
        let dir = cache_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(CACHE_FILENAME);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|value| match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default(),
            Err(_) => serde_json::Map::new(),
        };

        Ok(Self { path, ttl, entries })
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&mut self, key: &str) -> Option<DeviceSnapshot> {
        self.get_at(key, unix_now())
    }

    /// TTL check against an explicit clock; the public [`MdnsCache::get`]
    /// passes wall time.
    pub fn get_at(&mut self, key: &str, now: f64) -> Option<DeviceSnapshot> {
        let entry = self.entries.get(key)?;

        let valid = entry
            .as_object()
            .is_some_and(|obj| obj.contains_key("data") && obj.get("last_seen").is_some_and(Value::is_number));
        if !valid {
            debug!("dropping corrupt cache entry for {}", key);
            self.delete(key);
            return None;
        }

        let last_seen = entry["last_seen"].as_f64().unwrap_or(0.0);
        if now - last_seen > self.ttl.as_secs_f64() {
            debug!("cache entry for {} is stale", key);
            self.delete(key);
            return None;
        }

        match serde_json::from_value(entry["data"].clone()) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("unreadable cache payload for {}: {}", key, e);
                self.delete(key);
                None
            }
        }
    }

    pub fn set(&mut self, key: &str, snapshot: &DeviceSnapshot) {
        self.set_at(key, snapshot, unix_now());
    }

    pub fn set_at(&mut self, key: &str, snapshot: &DeviceSnapshot, now: f64) {
        let entry = serde_json::json!({
            "data": snapshot,
            "last_seen": now,
        });
        self.entries.insert(key.to_string(), entry);
        self.flush();
    }

    pub fn delete(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.flush();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.flush();
    }

    fn flush(&self) {
        let document = Value::Object(self.entries.clone());
        let result = serde_json::to_vec_pretty(&document)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&self.path, bytes));
        if let Err(e) = result {
            warn!("failed to flush mDNS cache to {}: {}", self.path.display(), e);
        }
    }
}

// ---------------------------------------------------------------------------
// Optional cross-process store
// ---------------------------------------------------------------------------

/// Interface of the external hash-map store used to share live device
/// state across processes. Only the consumed surface is specified here;
/// backends live outside this crate.
pub trait SharedStore: Send + Sync {
    fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
    fn set_add(&self, key: &str, member: &str) -> Result<()>;
    fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Key layout: `netaudio:<dialect>:<scope>:<identifier>[:<sub>]`.
pub mod keys {
    use std::net::Ipv4Addr;

    const PREFIX: &str = "netaudio";
    const DIALECT: &str = "dante";

    pub fn device(server_name: &str) -> String {
        format!("{PREFIX}:{DIALECT}:device:{server_name}")
    }

    pub fn host(ipv4: Ipv4Addr) -> String {
        format!("{PREFIX}:{DIALECT}:host:{ipv4}")
    }

    pub fn server(server_name: &str) -> String {
        format!("{PREFIX}:{DIALECT}:server:{server_name}")
    }

    pub fn service(server_name: &str, service_type: &str) -> String {
        format!("{PREFIX}:{DIALECT}:service:{server_name}:{service_type}")
    }

    pub fn hosts() -> String {
        format!("{PREFIX}:{DIALECT}:hosts")
    }

    pub fn servers() -> String {
        format!("{PREFIX}:{DIALECT}:servers")
    }

    pub fn services() -> String {
        format!("{PREFIX}:{DIALECT}:services")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            ipv4: Some(Ipv4Addr::new(192, 168, 1, 36)),
            name: Some(name.to_string()),
            ..DeviceSnapshot::default()
        }
    }

    #[test]
    fn entry_lives_until_ttl_then_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MdnsCache::open(Duration::from_secs(2), Some(dir.path())).unwrap();

        cache.set_at("avio-usb-2.local.", &snapshot("avio-usb-2"), 1000.0);

        let hit = cache.get_at("avio-usb-2.local.", 1001.0).unwrap();
        assert_eq!(hit.name.as_deref(), Some("avio-usb-2"));

        assert!(cache.get_at("avio-usb-2.local.", 1003.0).is_none());
        assert!(cache.keys().is_empty(), "stale entry is deleted from the store");
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = MdnsCache::open(DEFAULT_CACHE_TTL, Some(dir.path())).unwrap();
            cache.set("lx-dante.local.", &snapshot("lx-dante"));
        }

        let mut cache = MdnsCache::open(DEFAULT_CACHE_TTL, Some(dir.path())).unwrap();
        let hit = cache.get("lx-dante.local.").unwrap();
        assert_eq!(hit.name.as_deref(), Some("lx-dante"));
    }

    #[test]
    fn corrupt_entries_are_deleted_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        std::fs::write(
            &path,
            serde_json::to_vec_pretty(&serde_json::json!({
                "no-last-seen.local.": {"data": {}},
                "no-data.local.": {"last_seen": 1000.0},
                "bad-shape.local.": 42,
            }))
            .unwrap(),
        )
        .unwrap();

        let mut cache = MdnsCache::open(DEFAULT_CACHE_TTL, Some(dir.path())).unwrap();
        assert!(cache.get_at("no-last-seen.local.", 1000.0).is_none());
        assert!(cache.get_at("no-data.local.", 1000.0).is_none());
        assert!(cache.get_at("bad-shape.local.", 1000.0).is_none());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MdnsCache::open(DEFAULT_CACHE_TTL, Some(dir.path())).unwrap();
        cache.set("a.local.", &snapshot("a"));
        cache.set("b.local.", &snapshot("b"));

        cache.clear();
        assert!(cache.keys().is_empty());

        let mut reopened = MdnsCache::open(DEFAULT_CACHE_TTL, Some(dir.path())).unwrap();
        assert!(reopened.get("a.local.").is_none());
    }

    #[test]
    fn snapshot_round_trips_through_a_device() {
        let mut device = Device::new("avio-usb-2.local.");
        device.set_ipv4(Ipv4Addr::new(192, 168, 1, 36));
        device.name = "avio-usb-2".into();
        device.model_id = "DIUSBC".into();

        let snap = DeviceSnapshot::of(&device);
        let rebuilt = snap.into_device("avio-usb-2.local.");
        assert_eq!(rebuilt.server_name(), "avio-usb-2.local.");
        assert_eq!(rebuilt.name, "avio-usb-2");
        assert_eq!(rebuilt.model_id, "DIUSBC");
        assert_eq!(rebuilt.ipv4(), Some(Ipv4Addr::new(192, 168, 1, 36)));
    }

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(keys::device("lx.local."), "netaudio:dante:device:lx.local.");
        assert_eq!(
            keys::host(Ipv4Addr::new(192, 168, 1, 36)),
            "netaudio:dante:host:192.168.1.36"
        );
        assert_eq!(
            keys::service("lx.local.", "_netaudio-arc._udp.local."),
            "netaudio:dante:service:lx.local.:_netaudio-arc._udp.local."
        );
        assert_eq!(keys::hosts(), "netaudio:dante:hosts");
    }
}
