use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::consts::DEFAULT_METERING_PORT;
use crate::discovery::DEFAULT_DISCOVERY_WINDOW;

/// Discovery window heavier callers (the daemon, subscription edits)
/// default to; quick listings use [`DEFAULT_DISCOVERY_WINDOW`].
pub const DEFAULT_MDNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Below this window most devices don't finish resolving.
const MDNS_TIMEOUT_FLOOR: Duration = Duration::from_millis(350);

/// Runtime configuration shared by the one-shot client and the daemon.
#[derive(Debug, Clone)]
pub struct Settings {
    mdns_timeout: Duration,
    pub interface: Option<String>,
    pub dump_payloads: bool,
    pub refresh: bool,
    pub cache_ttl: Duration,
    pub cache_dir: Option<PathBuf>,
    pub metering_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mdns_timeout: DEFAULT_DISCOVERY_WINDOW,
            interface: None,
            dump_payloads: false,
            refresh: false,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_dir: None,
            metering_port: DEFAULT_METERING_PORT,
        }
    }
}

impl Settings {
    pub fn mdns_timeout(&self) -> Duration {
        self.mdns_timeout
    }

    pub fn set_mdns_timeout(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            warn!(
                "mDNS timeout must be positive, keeping {:?}",
                self.mdns_timeout
            );
            return;
        }
        if timeout < MDNS_TIMEOUT_FLOOR {
            warn!(
                "mDNS timeout {:?} is below {:?}; discovery will likely miss devices",
                timeout, MDNS_TIMEOUT_FLOOR
            );
        }
        self.mdns_timeout = timeout;
    }

    /// First IPv4 address of the configured interface, if any.
    pub fn interface_ip(&self) -> Option<IpAddr> {
        let name = self.interface.as_deref()?;
        let found = available_interfaces()
            .into_iter()
            .find(|(if_name, _)| if_name == name)
            .map(|(_, ip)| ip);

        if found.is_none() {
            warn!("could not find interface '{}', using the default route", name);
        }
        found
    }
}

/// The IPv4 address outgoing traffic leaves from: the configured
/// interface when set, the default route's address otherwise.
pub fn local_ipv4(settings: &Settings) -> Option<Ipv4Addr> {
    if let Some(IpAddr::V4(ipv4)) = settings.interface_ip() {
        return Some(ipv4);
    }

    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ipv4) => Some(ipv4),
        IpAddr::V6(_) => None,
    }
}

/// Candidate IPv4 interfaces, for the `interface list` surface.
pub fn available_interfaces() -> Vec<(String, IpAddr)> {
    let mut interfaces: Vec<(String, IpAddr)> = if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|interface| interface.ip().is_ipv4())
        .map(|interface| (interface.name.clone(), interface.ip()))
        .collect();
    interfaces.sort();
    interfaces
}
