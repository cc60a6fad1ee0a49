use std::net::Ipv4Addr;
use std::time::Duration;

/// mDNS service types advertised by every routing-capable device.
pub const SERVICE_ARC: &str = "_netaudio-arc._udp.local.";
pub const SERVICE_CHAN: &str = "_netaudio-chan._udp.local.";
pub const SERVICE_CMC: &str = "_netaudio-cmc._udp.local.";
pub const SERVICE_DBC: &str = "_netaudio-dbc._udp.local.";

pub const SERVICE_TYPES: [&str; 4] = [SERVICE_ARC, SERVICE_CHAN, SERVICE_CMC, SERVICE_DBC];

pub const DEVICE_CONTROL_PORT: u16 = 8800;
pub const DEVICE_SETTINGS_PORT: u16 = 8700;
pub const DEVICE_INFO_PORT: u16 = 8702;
pub const DEVICE_HEARTBEAT_PORT: u16 = 8708;

/// Source ports devices use for unsolicited change notifications.
pub const DEVICE_INFO_SRC_PORT1: u16 = 1029;
pub const DEVICE_INFO_SRC_PORT2: u16 = 1030;

pub const DEFAULT_METERING_PORT: u16 = 8751;

/// Well-known ports that get a fire-and-forget socket per device.
pub const WELL_KNOWN_PORTS: [u16; 3] =
    [DEVICE_CONTROL_PORT, DEVICE_SETTINGS_PORT, DEVICE_INFO_PORT];

pub const MULTICAST_GROUP_CONTROL_MONITORING: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 231);
pub const MULTICAST_GROUP_HEARTBEAT: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 233);

/// Timeout for the request/response socket to a discovered service port.
pub const SERVICE_SOCKET_TIMEOUT: Duration = Duration::from_secs(1);
/// Timeout for the well-known-port sockets. Replies to these writes arrive
/// on the multicast join sockets, so the read window is nominal.
pub const PORT_SOCKET_TIMEOUT: Duration = Duration::from_millis(10);
pub const METERING_SOCKET_TIMEOUT: Duration = Duration::from_millis(100);

pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// TTL applied to a device's registry entry after a heartbeat.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Dialect 1: audio-routing-control (ARC) command ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArcCommand {
    ChannelCounts = 0x1000,
    SetDeviceName = 0x1001,
    DeviceName = 0x1002,
    DeviceInfo = 0x1003,
    SetLatency = 0x1101,
    TxChannels = 0x2000,
    TxChannelFriendlyNames = 0x2010,
    SetTxChannelName = 0x2013,
    RxChannels = 0x3000,
    SetRxChannelName = 0x3001,
    AddSubscription = 0x3010,
    RemoveSubscription = 0x3014,
}

impl ArcCommand {
    pub fn id(self) -> u16 {
        self as u16
    }
}

// ---------------------------------------------------------------------------
// Dialect 2: device-settings / device-info message ids (bytes 26..28)
// ---------------------------------------------------------------------------

pub const MESSAGE_VERSIONS_STATUS: u16 = 0x0060;
pub const MESSAGE_MAKE_MODEL_STATUS: u16 = 0x00c0;
pub const MESSAGE_VOLUME_LEVELS: u16 = 0x00e0;
pub const MESSAGE_SAMPLE_RATE_STATUS: u16 = 0x0080;
pub const MESSAGE_ENCODING_STATUS: u16 = 0x0082;
pub const MESSAGE_SAMPLE_RATE_PULLUP_STATUS: u16 = 0x0084;
pub const MESSAGE_AES67_STATUS: u16 = 0x1006;
pub const MESSAGE_ROUTING_READY: u16 = 0x0010;
pub const MESSAGE_PROPERTY_CHANGE: u16 = 0x0011;
pub const MESSAGE_ROUTING_DEVICE_CHANGE: u16 = 0x0012;
pub const MESSAGE_RX_CHANNEL_CHANGE: u16 = 0x0014;
pub const MESSAGE_RX_FLOW_CHANGE: u16 = 0x0015;
pub const MESSAGE_TX_FLOW_CHANGE: u16 = 0x0016;
pub const MESSAGE_CLOCKING_STATUS: u16 = 0x0021;
pub const MESSAGE_UNICAST_CLOCKING_STATUS: u16 = 0x0022;
pub const MESSAGE_INTERFACE_STATUS: u16 = 0x0041;
pub const MESSAGE_AUDIO_INTERFACE_STATUS: u16 = 0x0042;
pub const MESSAGE_ACCESS_STATUS: u16 = 0x0043;
pub const MESSAGE_UPGRADE_STATUS: u16 = 0x0044;
pub const MESSAGE_LOCK_STATUS: u16 = 0x0045;
pub const MESSAGE_CODEC_STATUS: u16 = 0x0046;
pub const MESSAGE_SWITCH_VLAN_STATUS: u16 = 0x0047;
pub const MESSAGE_CLEAR_CONFIG_STATUS: u16 = 0x0048;
pub const MESSAGE_IFSTATS_STATUS: u16 = 0x0049;

// ---------------------------------------------------------------------------
// Model gating
// ---------------------------------------------------------------------------

/// Adapter models whose input gain stage is remotely controllable.
pub const GAIN_INPUT_MODELS: [&str; 2] = ["DAI1", "DAI2"];
/// Adapter models whose output gain stage is remotely controllable.
pub const GAIN_OUTPUT_MODELS: [&str; 2] = ["DAO1", "DAO2"];

/// Models known not to answer the volume-levels query.
pub const FEATURE_VOLUME_UNSUPPORTED: [&str; 8] = [
    "DAI1",
    "DAI2",
    "DAO1",
    "DAO2",
    "DIOUSB",
    "DIAES3",
    "DIUSBC",
    "_86012780000a0003",
];

/// `router_info` property value that marks a pure-software endpoint.
pub const SOFTWARE_ROUTER_INFO: &str = "\"Dante Via\"";
pub const SOFTWARE_TAG: &str = "Dante Via";
