use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::command::CommandExecutor;
use crate::consts::{
    DEVICE_CONTROL_PORT, DEVICE_SETTINGS_PORT, FEATURE_VOLUME_UNSUPPORTED, GAIN_INPUT_MODELS,
    GAIN_OUTPUT_MODELS, SERVICE_ARC, SERVICE_CHAN,
};
use crate::error::{NetaudioError, Result};
use crate::protocol::arc::{self, ArcRequest, ChannelDirection, RX_PAGE_SIZE, TX_PAGE_SIZE};
use crate::protocol::settings::{self, GainDirection};
use crate::sockets::{PoolSocket, SocketPool};
use crate::subscription::Subscription;

/// A service instance advertised by a device over mDNS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub service_type: String,
    pub ipv4: Ipv4Addr,
    pub port: u16,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// An unparsed status message captured off the monitoring groups.
#[derive(Debug, Clone)]
pub struct StatusBlob {
    pub message_id: u16,
    pub payload: Vec<u8>,
    pub received_at: SystemTime,
}

/// One device on the routing network, keyed by its mDNS server name.
///
/// The server name is fixed at construction; the IPv4 address is set at
/// most once per lifecycle. Channel maps fill monotonically during
/// enumeration and are only dropped when a routing change event arrives.
#[derive(Debug, Default, Clone)]
pub struct Device {
    server_name: String,
    pub name: String,
    ipv4: Option<Ipv4Addr>,
    pub mac_address: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub model_id: String,
    pub dante_model: String,
    pub dante_model_id: String,
    pub sample_rate: Option<u32>,
    pub latency_ns: Option<u64>,
    pub software: Option<String>,
    pub services: HashMap<String, ServiceEndpoint>,
    pub rx_channels: BTreeMap<u16, Channel>,
    pub tx_channels: BTreeMap<u16, Channel>,
    pub subscriptions: Vec<Subscription>,
    pub rx_count: u16,
    pub tx_count: u16,
    pub rx_count_raw: u16,
    pub tx_count_raw: u16,
    pub status_blobs: HashMap<String, StatusBlob>,
    /// Last enumeration failure; partial state stays usable.
    pub error: Option<String>,
    sockets: SocketPool,
    executor: CommandExecutor,
}

impl Device {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            ..Self::default()
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4
    }

    /// First sighting wins; devices keep one address per lifecycle.
    pub fn set_ipv4(&mut self, ipv4: Ipv4Addr) {
        if self.ipv4.is_none() {
            self.ipv4 = Some(ipv4);
        }
    }

    pub fn set_executor(&mut self, executor: CommandExecutor) {
        self.executor = executor;
    }

    pub fn get_service(&self, service_type: &str) -> Option<&ServiceEndpoint> {
        self.services
            .values()
            .find(|service| service.service_type == service_type)
    }

    /// Attaches a discovered service and folds its advertised properties
    /// into the device: MAC from the control-monitoring `id`, model id,
    /// sample rate, latency, and the software-endpoint tag.
    pub fn attach_service(&mut self, endpoint: ServiceEndpoint) {
        self.set_ipv4(endpoint.ipv4);

        let properties = &endpoint.properties;
        if endpoint.service_type == crate::consts::SERVICE_CMC {
            if let Some(id) = properties.get("id") {
                self.mac_address = Some(id.clone());
            }
        }
        if let Some(model) = properties.get("model") {
            self.model_id = model.clone();
        }
        if let Some(rate) = properties.get("rate").and_then(|rate| rate.parse().ok()) {
            self.sample_rate = Some(rate);
        }
        if let Some(latency) = properties
            .get("latency_ns")
            .and_then(|latency| latency.parse().ok())
        {
            self.latency_ns = Some(latency);
        }
        if properties.get("router_info").map(String::as_str)
            == Some(crate::consts::SOFTWARE_ROUTER_INFO)
        {
            self.software = Some(crate::consts::SOFTWARE_TAG.to_string());
        }

        self.services.insert(endpoint.name.clone(), endpoint);
    }

    /// Closes every socket; in-flight reads resolve as cancelled.
    pub fn close_sockets(&mut self) {
        self.sockets.close();
    }

    fn require_ipv4(&self) -> Result<Ipv4Addr> {
        self.ipv4
            .ok_or_else(|| NetaudioError::Precondition(format!("{} has no address yet", self.server_name)))
    }

    async fn arc_socket(&mut self) -> Result<PoolSocket> {
        let port = self
            .get_service(SERVICE_ARC)
            .map(|service| service.port)
            .ok_or_else(|| {
                NetaudioError::Precondition(format!(
                    "{} has no audio-routing-control service",
                    self.server_name
                ))
            })?;
        let ipv4 = self.require_ipv4()?;

        self.sockets.open_service_socket(ipv4, port).await?;
        Ok(self.sockets.get(port).expect("socket just opened").clone())
    }

    async fn port_socket(&mut self, port: u16) -> Result<PoolSocket> {
        let ipv4 = self.require_ipv4()?;
        self.sockets.open_port_sockets(ipv4).await?;
        Ok(self.sockets.get(port).expect("well-known socket just opened").clone())
    }

    async fn arc_command(&mut self, request: ArcRequest) -> Result<Option<Vec<u8>>> {
        let sock = self.arc_socket().await?;
        self.executor.round_trip(&sock, &request.encode()).await
    }

    /// Mutations expect an acknowledgement; silence is a timeout error
    /// rather than a tolerated miss.
    async fn arc_mutation(&mut self, request: ArcRequest, what: &str) -> Result<Vec<u8>> {
        match self.arc_command(request).await? {
            Some(response) => Ok(response),
            None => Err(NetaudioError::Timeout(format!(
                "{what} acknowledgement from {}",
                self.server_name
            ))),
        }
    }

    async fn settings_command(&mut self, port: u16, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        let sock = self.port_socket(port).await?;
        self.executor.round_trip(&sock, frame).await
    }

    fn record_error(&mut self, context: &str, error: &NetaudioError) {
        warn!("{}: {}: {}", self.server_name, context, error);
        self.error = Some(format!("{context}: {error}"));
    }

    // -----------------------------------------------------------------------
    // Enumeration
    // -----------------------------------------------------------------------

    /// Fills the device model: sockets, name, channel counts, tx pages,
    /// rx pages. Individual failures are recorded on `error` and leave
    /// whatever partial state was already gathered.
    pub async fn get_controls(&mut self) -> Result<()> {
        self.error = None;

        if let Err(e) = self.open_sockets().await {
            self.record_error("opening sockets", &e);
        }

        if self.name.is_empty() {
            match self.arc_command(arc::device_name()).await {
                Ok(Some(frame)) => match arc::parse_device_name(&frame) {
                    Ok(name) => self.name = name,
                    Err(e) => self.record_error("parsing device name", &e),
                },
                Ok(None) => warn!("{}: no reply to device-name query", self.server_name),
                Err(e) => self.record_error("querying device name", &e),
            }
        }

        if self.rx_count == 0 || self.tx_count == 0 {
            match self.arc_command(arc::channel_counts()).await {
                Ok(Some(frame)) => match arc::parse_channel_counts(&frame) {
                    Ok((tx, rx)) => {
                        self.tx_count_raw = tx;
                        self.tx_count = tx;
                        self.rx_count_raw = rx;
                        self.rx_count = rx;
                    }
                    Err(e) => self.record_error("parsing channel counts", &e),
                },
                Ok(None) => warn!("{}: no reply to channel-count query", self.server_name),
                Err(e) => self.record_error("querying channel counts", &e),
            }
        }

        if self.tx_count > 0 && self.tx_channels.is_empty() {
            self.get_tx_channels().await;
        }

        if self.rx_count > 0 && self.rx_channels.is_empty() {
            self.get_rx_channels().await;
        }

        Ok(())
    }

    async fn open_sockets(&mut self) -> Result<()> {
        let ipv4 = self.require_ipv4()?;
        let ports: Vec<u16> = self
            .services
            .values()
            .filter(|service| service.service_type != SERVICE_CHAN)
            .map(|service| service.port)
            .collect();

        for port in ports {
            self.sockets.open_service_socket(ipv4, port).await?;
        }
        self.sockets.open_port_sockets(ipv4).await?;
        Ok(())
    }

    /// Walks the tx pages in strides of two, 32 channels per stride, with
    /// the friendly-name overlay read first. Paging stops early at a page
    /// whose channel-group column changes, or whose body repeats the known
    /// sample rate — when the sample rate is not yet known (no prior rx
    /// scan or mDNS `rate` property) that second stop cannot fire, and
    /// enumeration may read redundant pages.
    pub async fn get_tx_channels(&mut self) {
        let pages = (self.tx_count as usize / 16).max(1);
        let limit = (self.tx_count as usize).min(TX_PAGE_SIZE);
        let mut friendly_names: HashMap<u16, String> = HashMap::new();

        for page in (0..pages).step_by(2) {
            match self.arc_command(arc::transmitters(page as u8, true)).await {
                Ok(Some(frame)) => match arc::parse_tx_friendly_names(&frame, limit) {
                    Ok(names) => friendly_names.extend(names),
                    Err(e) => self.record_error("parsing tx friendly names", &e),
                },
                Ok(None) => trace!("{}: no tx friendly-name reply", self.server_name),
                Err(e) => self.record_error("querying tx friendly names", &e),
            }
        }

        let mut tx_channels = BTreeMap::new();

        for page in (0..pages).step_by(2) {
            let frame = match self.arc_command(arc::transmitters(page as u8, false)).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    trace!("{}: no tx channel reply for page {}", self.server_name, page);
                    continue;
                }
                Err(e) => {
                    self.record_error("querying tx channels", &e);
                    break;
                }
            };

            let known_rate = self.sample_rate;
            let has_disabled_channels = known_rate
                .map(|rate| arc::sample_rate_occurrences(&frame, rate) == 2)
                .unwrap_or(false);

            let parsed = match arc::parse_tx_channels(&frame, limit) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.record_error("parsing tx channels", &e);
                    break;
                }
            };

            if parsed.sample_rate.is_some() {
                self.sample_rate = parsed.sample_rate;
            }

            for record in &parsed.channels {
                let mut channel = Channel::new(
                    ChannelDirection::Tx,
                    &self.server_name,
                    record.number,
                    record.name.clone(),
                );
                channel.status_code = Some(record.status);
                channel.friendly_name = friendly_names.get(&record.number).cloned();
                tx_channels.insert(record.number, channel);
            }

            if parsed.stopped_on_group_change || has_disabled_channels {
                break;
            }
        }

        self.tx_channels = tx_channels;
    }

    /// Walks the rx pages, 16 channels each, deriving a subscription for
    /// every channel whose tx-device offset is set. The wire literal `"."`
    /// for the tx device means the device itself.
    pub async fn get_rx_channels(&mut self) {
        let pages = (self.rx_count as usize / 16).max(1);
        let limit = (self.rx_count as usize).min(RX_PAGE_SIZE);

        let mut rx_channels = BTreeMap::new();
        let mut subscriptions = Vec::new();

        for page in 0..pages {
            let frame = match self.arc_command(arc::receivers(page as u8)).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    trace!("{}: no rx channel reply for page {}", self.server_name, page);
                    continue;
                }
                Err(e) => {
                    self.record_error("querying rx channels", &e);
                    break;
                }
            };

            let parsed = match arc::parse_rx_channels(&frame, limit) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.record_error("parsing rx channels", &e);
                    break;
                }
            };

            if parsed.sample_rate.is_some() {
                self.sample_rate = parsed.sample_rate;
            }

            for record in parsed.channels {
                let mut channel = Channel::new(
                    ChannelDirection::Rx,
                    &self.server_name,
                    record.number,
                    record.rx_channel_name.clone(),
                );
                channel.status_code = Some(record.channel_status);
                rx_channels.insert(record.number, channel);

                if record.tx_device_offset != 0 {
                    let tx_device_name = if record.tx_device_name == "." {
                        self.name.clone()
                    } else {
                        record.tx_device_name
                    };

                    subscriptions.push(Subscription {
                        rx_channel_name: record.rx_channel_name,
                        rx_device_name: self.name.clone(),
                        tx_channel_name: record.tx_channel_name,
                        tx_device_name,
                        status_code: record.subscription_status,
                        rx_channel_status_code: record.channel_status,
                    });
                }
            }
        }

        self.rx_channels = rx_channels;
        self.subscriptions = subscriptions;
    }

    /// Drops the routing view so the next enumeration rebuilds it. Called
    /// when a change event arrives off the monitoring group.
    pub fn invalidate_routing(&mut self) {
        self.rx_channels.clear();
        self.subscriptions.clear();
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn set_device_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let request = arc::set_device_name(name)?;
        self.arc_mutation(request, "set-name").await
    }

    pub async fn reset_device_name(&mut self) -> Result<Vec<u8>> {
        self.arc_mutation(arc::reset_device_name(), "reset-name").await
    }

    pub async fn set_channel_name(
        &mut self,
        direction: ChannelDirection,
        channel_number: u16,
        new_name: &str,
    ) -> Result<Vec<u8>> {
        let request = arc::set_channel_name(direction, channel_number, new_name)?;
        self.arc_mutation(request, "set-channel-name").await
    }

    pub async fn reset_channel_name(
        &mut self,
        direction: ChannelDirection,
        channel_number: u16,
    ) -> Result<Vec<u8>> {
        let request = arc::reset_channel_name(direction, channel_number)?;
        self.arc_mutation(request, "reset-channel-name").await
    }

    pub async fn add_subscription(
        &mut self,
        rx_channel_number: u16,
        tx_channel_name: &str,
        tx_device_name: &str,
    ) -> Result<Vec<u8>> {
        let request = arc::add_subscription(rx_channel_number, tx_channel_name, tx_device_name)?;
        self.arc_mutation(request, "subscription add").await
    }

    pub async fn remove_subscription(&mut self, rx_channel_number: u16) -> Result<Vec<u8>> {
        let request = arc::remove_subscription(rx_channel_number)?;
        self.arc_mutation(request, "subscription remove").await
    }

    pub async fn set_latency(&mut self, latency_ms: u32) -> Result<Vec<u8>> {
        self.arc_mutation(arc::set_latency(latency_ms), "set-latency").await
    }

    pub async fn identify(&mut self) -> Result<Option<Vec<u8>>> {
        let frame = settings::identify();
        self.settings_command(DEVICE_SETTINGS_PORT, &frame).await
    }

    pub async fn set_sample_rate(&mut self, sample_rate: u32) -> Result<Option<Vec<u8>>> {
        let frame = settings::set_sample_rate(sample_rate);
        self.settings_command(DEVICE_SETTINGS_PORT, &frame).await
    }

    pub async fn set_encoding(&mut self, encoding: u8) -> Result<Option<Vec<u8>>> {
        let frame = settings::set_encoding(encoding);
        self.settings_command(DEVICE_SETTINGS_PORT, &frame).await
    }

    pub async fn enable_aes67(&mut self, enabled: bool) -> Result<Option<Vec<u8>>> {
        let frame = settings::enable_aes67(enabled);
        self.settings_command(DEVICE_SETTINGS_PORT, &frame).await
    }

    /// Remote gain control exists only on the analog adapter models;
    /// everything else fails the model gate.
    pub async fn set_gain_level(
        &mut self,
        channel_number: u16,
        gain_level: u8,
        direction: GainDirection,
    ) -> Result<Option<Vec<u8>>> {
        let allowed = match direction {
            GainDirection::Input => GAIN_INPUT_MODELS.contains(&self.model_id.as_str()),
            GainDirection::Output => GAIN_OUTPUT_MODELS.contains(&self.model_id.as_str()),
        };
        if !allowed {
            return Err(NetaudioError::UnsupportedFeature(format!(
                "model {:?} has no adjustable {} gain",
                self.model_id,
                match direction {
                    GainDirection::Input => "input",
                    GainDirection::Output => "output",
                }
            )));
        }

        let frame = settings::set_gain_level(channel_number, gain_level, direction);
        self.settings_command(DEVICE_SETTINGS_PORT, &frame).await
    }

    // -----------------------------------------------------------------------
    // Volume metering
    // -----------------------------------------------------------------------

    /// Whether the device answers the volume-levels query at all.
    pub fn supports_volume(&self) -> bool {
        self.software.is_none() && !FEATURE_VOLUME_UNSUPPORTED.contains(&self.model_id.as_str())
    }

    pub(crate) fn mac_bytes(&self) -> [u8; 6] {
        let Some(mac) = &self.mac_address else {
            return [0; 6];
        };

        let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if hex.len() != 12 {
            return [0; 6];
        }

        let mut bytes = [0u8; 6];
        for (i, chunk) in bytes.iter_mut().enumerate() {
            *chunk = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap_or(0);
        }
        bytes
    }

    /// Asks the device to stream one round of per-channel levels to
    /// `local_ip:port` and folds them into the channel records. Devices
    /// that cannot meter return success with nothing.
    pub async fn get_volume(&mut self, local_ip: Ipv4Addr, port: u16) -> Result<()> {
        if !self.supports_volume() {
            debug!("{}: volume metering unsupported, skipping", self.server_name);
            return Ok(());
        }

        let device_ip = self.require_ipv4()?;
        let mac = self.mac_bytes();
        let name = self.name.clone();

        let control = self.port_socket(DEVICE_CONTROL_PORT).await?;
        let started = self
            .executor
            .round_trip(&control, &settings::volume_start(&name, local_ip, mac, port))
            .await?;

        if let Some(reply) = &started {
            if reply.get(15) == Some(&0xff) {
                debug!("{}: volume level command not supported", self.server_name);
                return Ok(());
            }
        }

        let metering = self.sockets.metering_socket(local_ip, port).await?.clone();
        while let Some((data, addr)) = self.executor.recv_from(&metering).await? {
            if addr.ip() != std::net::IpAddr::V4(device_ip) {
                continue;
            }

            self.executor
                .send_only(&control, &settings::volume_stop(&name, mac, port))
                .await?;

            match settings::parse_volume_levels(
                &data,
                self.rx_count_raw as usize,
                self.tx_count_raw as usize,
            ) {
                Ok(levels) => self.apply_volume_levels(&levels),
                Err(e) => self.record_error("parsing volume levels", &e),
            }
            break;
        }

        Ok(())
    }

    pub fn apply_volume_levels(&mut self, levels: &settings::VolumeLevels) {
        for channel in self.tx_channels.values_mut() {
            if let Some(volume) = levels.tx.get(channel.number as usize - 1) {
                channel.volume = Some(*volume);
            }
        }
        for channel in self.rx_channels.values_mut() {
            if let Some(volume) = levels.rx.get(channel.number as usize - 1) {
                channel.volume = Some(*volume);
            }
        }
    }

    pub fn record_status_blob(&mut self, kind: &str, message_id: u16, payload: &[u8]) {
        self.status_blobs.insert(
            kind.to_string(),
            StatusBlob {
                message_id,
                payload: payload.to_vec(),
                received_at: SystemTime::now(),
            },
        );
    }

    /// Serializable snapshot for caches and external consumers.
    pub fn to_view(&self) -> DeviceView {
        DeviceView {
            server_name: self.server_name.clone(),
            name: self.name.clone(),
            ipv4: self.ipv4,
            mac_address: self.mac_address.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            model_id: self.model_id.clone(),
            dante_model: self.dante_model.clone(),
            dante_model_id: self.dante_model_id.clone(),
            sample_rate: self.sample_rate,
            latency_ns: self.latency_ns,
            software: self.software.clone(),
            services: self.services.clone(),
            receivers: self.rx_channels.clone(),
            transmitters: self.tx_channels.clone(),
            subscriptions: self.subscriptions.clone(),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.server_name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Immutable, serializable view of a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub server_name: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub manufacturer: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub model_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub dante_model: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub dante_model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default)]
    pub services: HashMap<String, ServiceEndpoint>,
    #[serde(default)]
    pub receivers: BTreeMap<u16, Channel>,
    #[serde(default)]
    pub transmitters: BTreeMap<u16, Channel>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}
