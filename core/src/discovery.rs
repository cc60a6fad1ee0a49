use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};
use tracing::{debug, info, trace, warn};

use crate::consts::SERVICE_TYPES;
use crate::device::{Device, ServiceEndpoint};
use crate::error::Result;
use crate::registry::Registry;

const BROWSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default window for one-shot discovery.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_millis(1250);

/// Builds a service endpoint from a resolved mDNS record. Devices are
/// keyed by the advertising host's server name, which stays stable across
/// address changes.
fn parse_resolved(info: &ResolvedService) -> Option<(String, ServiceEndpoint)> {
    let address = info
        .addresses
        .iter()
        .find(|scoped_ip| scoped_ip.is_ipv4())
        .or_else(|| info.addresses.iter().next())
        .map(|scoped_ip| scoped_ip.to_ip_addr());

    let Some(IpAddr::V4(ipv4)) = address else {
        warn!("no IPv4 address for service {}", info.fullname);
        return None;
    };

    let mut properties = HashMap::new();
    for prop in info.txt_properties.iter() {
        properties.insert(prop.key().to_string(), prop.val_str().to_string());
    }

    let endpoint = ServiceEndpoint {
        name: info.fullname.clone(),
        service_type: info.ty_domain.clone(),
        ipv4,
        port: info.port,
        properties,
    };

    Some((info.host.clone(), endpoint))
}

/// mDNS browser over the four netaudio service types.
///
/// One-shot callers use [`MdnsBrowser::get_devices`], which browses for a
/// bounded window and returns owned devices. The daemon instead calls
/// [`MdnsBrowser::start`], which feeds the shared registry from a thread
/// per service type until the stop flag clears.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl MdnsBrowser {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Browses every service type for the configured window and folds the
    /// resolved services into one device per server name.
    pub async fn get_devices(&self) -> Result<HashMap<String, Device>> {
        let mut receivers = Vec::new();
        for service_type in SERVICE_TYPES {
            receivers.push(self.daemon.browse(service_type)?);
        }

        let window = self.timeout;
        let endpoints = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + window;
            let mut endpoints = Vec::new();

            while Instant::now() < deadline {
                for receiver in &receivers {
                    while let Ok(event) = receiver.try_recv() {
                        match event {
                            ServiceEvent::ServiceResolved(service_info) => {
                                if let Some(parsed) = parse_resolved(&service_info) {
                                    endpoints.push(parsed);
                                }
                            }
                            ServiceEvent::ServiceFound(service_type, fullname) => {
                                trace!("found {} ({}), resolving", fullname, service_type);
                            }
                            _ => {}
                        }
                    }
                }
                std::thread::sleep(BROWSE_TIMEOUT);
            }
            endpoints
        })
        .await
        .map_err(|e| crate::error::NetaudioError::Discovery(e.to_string()))?;

        for service_type in SERVICE_TYPES {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                debug!("failed to stop browse for {}: {}", service_type, e);
            }
        }

        let mut devices: HashMap<String, Device> = HashMap::new();
        for (server_name, endpoint) in endpoints {
            devices
                .entry(server_name.clone())
                .or_insert_with(|| Device::new(&server_name))
                .attach_service(endpoint);
        }

        info!("discovered {} device(s)", devices.len());
        Ok(devices)
    }

    /// Continuous discovery for the daemon: one receiver thread per
    /// service type, reconciling add/remove into the registry.
    pub fn start(&self, registry: Arc<Registry>) -> Result<Vec<JoinHandle<()>>> {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();

        for service_type in SERVICE_TYPES {
            let receiver = self.daemon.browse(service_type)?;
            let registry = registry.clone();
            let running = self.running.clone();

            let handle = std::thread::Builder::new()
                .name(format!("mdns-{}", service_type.trim_end_matches("._udp.local.")))
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        match receiver.recv_timeout(BROWSE_TIMEOUT) {
                            Ok(event) => handle_event(event, &registry),
                            Err(e) => {
                                let message = e.to_string().to_lowercase();
                                if message.contains("timeout") || message.contains("timed out") {
                                    continue;
                                }
                                warn!("mDNS receiver error: {}", e);
                                break;
                            }
                        }
                    }
                    debug!("browser thread for {} stopped", service_type);
                })?;
            handles.push(handle);
        }

        info!("started mDNS discovery for {} service types", SERVICE_TYPES.len());
        Ok(handles)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        for service_type in SERVICE_TYPES {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                debug!("failed to stop mDNS browse for {}: {}", service_type, e);
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("failed to shut down mDNS daemon: {}", e);
        }
    }
}

fn handle_event(event: ServiceEvent, registry: &Registry) {
    match event {
        ServiceEvent::ServiceResolved(service_info) => {
            if let Some((server_name, endpoint)) = parse_resolved(&service_info) {
                registry.upsert_service(&server_name, endpoint);
            }
        }
        ServiceEvent::ServiceRemoved(_service_type, fullname) => {
            debug!("service removed: {}", fullname);
            registry.remove_service_instance(&fullname);
        }
        ServiceEvent::ServiceFound(service_type, fullname) => {
            trace!("found {} ({}), resolving", fullname, service_type);
        }
        ServiceEvent::SearchStarted(service_type) => {
            debug!("mDNS search started for {}", service_type);
        }
        ServiceEvent::SearchStopped(service_type) => {
            debug!("mDNS search stopped for {}", service_type);
        }
        _ => {
            trace!("unhandled mDNS event");
        }
    }
}
