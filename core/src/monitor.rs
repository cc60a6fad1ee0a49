use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::consts::{
    DEVICE_HEARTBEAT_PORT, DEVICE_INFO_PORT, DEVICE_INFO_SRC_PORT2, DEVICE_SETTINGS_PORT,
    HEARTBEAT_TTL, MAX_DATAGRAM_SIZE, MESSAGE_ACCESS_STATUS, MESSAGE_AES67_STATUS,
    MESSAGE_AUDIO_INTERFACE_STATUS, MESSAGE_CLEAR_CONFIG_STATUS, MESSAGE_CLOCKING_STATUS,
    MESSAGE_CODEC_STATUS, MESSAGE_ENCODING_STATUS, MESSAGE_IFSTATS_STATUS,
    MESSAGE_INTERFACE_STATUS, MESSAGE_LOCK_STATUS, MESSAGE_MAKE_MODEL_STATUS,
    MESSAGE_ROUTING_DEVICE_CHANGE, MESSAGE_ROUTING_READY, MESSAGE_RX_CHANNEL_CHANGE,
    MESSAGE_RX_FLOW_CHANGE, MESSAGE_SAMPLE_RATE_PULLUP_STATUS, MESSAGE_SAMPLE_RATE_STATUS,
    MESSAGE_SWITCH_VLAN_STATUS, MESSAGE_TX_FLOW_CHANGE, MESSAGE_UNICAST_CLOCKING_STATUS,
    MESSAGE_UPGRADE_STATUS, MESSAGE_VERSIONS_STATUS, MULTICAST_GROUP_CONTROL_MONITORING,
    MULTICAST_GROUP_HEARTBEAT,
};
use crate::error::Result;
use crate::protocol::settings;
use crate::registry::Registry;

const RECV_POLL: Duration = Duration::from_millis(250);
const EVENT_QUEUE_DEPTH: usize = 64;

/// Raised by the monitor when an observed change event invalidates a
/// device's routing view; the daemon re-runs the rx enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    RoutingChanged { server_name: String },
}

/// Passive listener on the three multicast groups: device-info, metering
/// and heartbeat. One OS thread per socket; parsed events are applied to
/// the registry in arrival order.
pub struct MulticastMonitor {
    registry: Arc<Registry>,
    metering_port: u16,
    running: Arc<AtomicBool>,
    event_tx: mpsc::Sender<MonitorEvent>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MulticastMonitor {
    pub fn new(registry: Arc<Registry>, metering_port: u16) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (
            Self {
                registry,
                metering_port,
                running: Arc::new(AtomicBool::new(false)),
                event_tx,
                handles: Mutex::new(Vec::new()),
            },
            event_rx,
        )
    }

    pub fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let listeners = [
            ("monitor-info", MULTICAST_GROUP_CONTROL_MONITORING, DEVICE_INFO_PORT),
            ("monitor-metering", MULTICAST_GROUP_CONTROL_MONITORING, self.metering_port),
            ("monitor-heartbeat", MULTICAST_GROUP_HEARTBEAT, DEVICE_HEARTBEAT_PORT),
        ];

        let mut handles = self.handles.lock();
        for (name, group, port) in listeners {
            let socket = join_multicast(group, port)?;
            let registry = self.registry.clone();
            let running = self.running.clone();
            let event_tx = self.event_tx.clone();
            let metering_port = self.metering_port;

            let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
                let mut buf = [0u8; MAX_DATAGRAM_SIZE];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, src)) => handle_datagram(
                            &registry,
                            &event_tx,
                            port,
                            metering_port,
                            src,
                            &buf[..len],
                        ),
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                warn!("multicast receive error on port {}: {}", port, e);
                            }
                            break;
                        }
                    }
                }
                debug!("listener on {}:{} stopped", group, port);
            })?;
            handles.push(handle);
        }

        info!("multicast monitor listening (metering port {})", self.metering_port);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                warn!("monitor thread '{}' panicked during shutdown", name);
            }
        }
    }
}

fn join_multicast(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_read_timeout(Some(RECV_POLL))?;
    Ok(socket.into())
}

fn status_name(message_id: u16) -> Option<&'static str> {
    match message_id {
        MESSAGE_SAMPLE_RATE_STATUS => Some("sample_rate_status"),
        MESSAGE_ENCODING_STATUS => Some("encoding_status"),
        MESSAGE_CLOCKING_STATUS => Some("clocking_status"),
        MESSAGE_UNICAST_CLOCKING_STATUS => Some("unicast_clocking_status"),
        MESSAGE_AES67_STATUS => Some("aes67_status"),
        MESSAGE_LOCK_STATUS => Some("lock_status"),
        MESSAGE_CODEC_STATUS => Some("codec_status"),
        MESSAGE_INTERFACE_STATUS => Some("interface_status"),
        MESSAGE_AUDIO_INTERFACE_STATUS => Some("audio_interface_status"),
        MESSAGE_ACCESS_STATUS => Some("access_status"),
        MESSAGE_UPGRADE_STATUS => Some("upgrade_status"),
        MESSAGE_SWITCH_VLAN_STATUS => Some("switch_vlan_status"),
        MESSAGE_SAMPLE_RATE_PULLUP_STATUS => Some("sample_rate_pullup_status"),
        MESSAGE_CLEAR_CONFIG_STATUS => Some("clear_config_status"),
        MESSAGE_IFSTATS_STATUS => Some("ifstats_status"),
        MESSAGE_ROUTING_READY => Some("routing_ready"),
        _ => None,
    }
}

fn is_change_event(message_id: u16) -> bool {
    matches!(
        message_id,
        MESSAGE_ROUTING_DEVICE_CHANGE
            | MESSAGE_RX_CHANNEL_CHANGE
            | MESSAGE_RX_FLOW_CHANGE
            | MESSAGE_TX_FLOW_CHANGE
    )
}

/// Applies one multicast datagram to the registry. Unknown sources are
/// dropped; parse failures are logged and swallowed so the listener never
/// dies on bad input.
fn handle_datagram(
    registry: &Registry,
    event_tx: &mpsc::Sender<MonitorEvent>,
    port: u16,
    metering_port: u16,
    src: SocketAddr,
    frame: &[u8],
) {
    let IpAddr::V4(src_ip) = src.ip() else {
        return;
    };

    if port == DEVICE_HEARTBEAT_PORT {
        registry.touch_ipv4(src_ip, HEARTBEAT_TTL);
        return;
    }

    let Some(handle) = registry.by_ipv4(src_ip) else {
        trace!("dropping datagram from unknown host {}", src_ip);
        return;
    };

    if port == metering_port {
        let mut device = handle.blocking_lock();
        let (rx_count, tx_count) = (device.rx_count_raw as usize, device.tx_count_raw as usize);
        if rx_count == 0 && tx_count == 0 {
            debug!("{}: metering frame before channel counts are known", device.server_name());
            return;
        }
        match settings::parse_volume_levels(frame, rx_count, tx_count) {
            Ok(levels) => device.apply_volume_levels(&levels),
            Err(e) => debug!("{}: bad metering frame: {}", device.server_name(), e),
        }
        return;
    }

    let Some(message_id) = settings::message_id(frame) else {
        trace!("short or non-status datagram from {}", src_ip);
        return;
    };

    match message_id {
        MESSAGE_VERSIONS_STATUS => match settings::parse_versions_status(frame) {
            Ok(status) => {
                let mut device = handle.blocking_lock();
                device.dante_model = status.model;
                device.dante_model_id = status.model_id;
            }
            Err(e) => debug!("bad versions status from {}: {}", src_ip, e),
        },
        MESSAGE_MAKE_MODEL_STATUS => match settings::parse_make_model_status(frame) {
            Ok(status) => {
                let mut device = handle.blocking_lock();
                device.manufacturer = status.manufacturer;
                device.model = status.model;
            }
            Err(e) => debug!("bad make/model status from {}: {}", src_ip, e),
        },
        id if is_change_event(id)
            && (src.port() == DEVICE_SETTINGS_PORT || src.port() == DEVICE_INFO_SRC_PORT2) =>
        {
            let server_name = {
                let mut device = handle.blocking_lock();
                device.invalidate_routing();
                device.server_name().to_string()
            };
            debug!("{}: routing change event {:#06x}", server_name, id);
            if event_tx.try_send(MonitorEvent::RoutingChanged { server_name }).is_err() {
                warn!("monitor event queue full, dropping change event");
            }
        }
        id => {
            if let Some(name) = status_name(id) {
                handle.blocking_lock().record_status_blob(name, id, frame);
            } else {
                trace!("unhandled message type {:#06x} from {}", id, src_ip);
            }
        }
    }
}
