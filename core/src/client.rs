use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::cache::{DeviceSnapshot, MdnsCache};
use crate::channel::Channel;
use crate::command::CommandExecutor;
use crate::config::Settings;
use crate::device::Device;
use crate::discovery::MdnsBrowser;
use crate::error::{NetaudioError, Result};
use crate::protocol::arc::ChannelDirection;
use crate::protocol::settings::GainDirection;
use crate::subscription::Subscription;

const DUMP_DIR: &str = "netaudio_device_payloads";

/// Selects one device by human name, or by host (IPv4 or server name).
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub name: Option<String>,
    pub host: Option<String>,
}

impl DeviceFilter {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn by_host(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.host.is_none()
    }

    fn matches(&self, device: &Device) -> bool {
        if let Some(name) = &self.name {
            return device.name == *name;
        }
        if let Some(host) = &self.host {
            if let Ok(ipv4) = host.parse::<Ipv4Addr>() {
                return device.ipv4() == Some(ipv4);
            }
            let server = device.server_name().to_lowercase();
            let host = host.to_lowercase();
            return server == host
                || server == format!("{host}.local.")
                || server == format!("{host}.local");
        }
        true
    }
}

/// Selects one channel on an already-selected device.
#[derive(Debug, Clone, Default)]
pub struct ChannelSelector {
    pub name: Option<String>,
    pub number: Option<u16>,
}

impl ChannelSelector {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn by_number(number: u16) -> Self {
        Self {
            number: Some(number),
            ..Self::default()
        }
    }

    /// Rx channels match on the wire name; tx channels prefer the
    /// friendly name and fall back to the wire name when no friendly
    /// name is set.
    fn matches(&self, channel: &Channel, use_friendly: bool) -> bool {
        if let Some(number) = self.number {
            return channel.number == number;
        }
        if let Some(name) = &self.name {
            if use_friendly {
                return match &channel.friendly_name {
                    Some(friendly) => friendly == name,
                    None => channel.name == *name,
                };
            }
            return channel.name == *name;
        }
        false
    }
}

/// Per-device channel listing, in the shape `channel list` renders.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelListing {
    pub device_name: String,
    pub receivers: Vec<Channel>,
    pub transmitters: Vec<Channel>,
}

impl ChannelListing {
    fn of(device: &Device) -> Self {
        Self {
            device_name: device.to_string(),
            receivers: device.rx_channels.values().cloned().collect(),
            transmitters: device.tx_channels.values().cloned().collect(),
        }
    }
}

/// Everything rx-side and tx-side needed to create one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub rx_device: DeviceFilter,
    pub rx_channel: ChannelSelector,
    /// Defaults to the rx device when omitted (loopback routing).
    pub tx_device: Option<DeviceFilter>,
    pub tx_channel: ChannelSelector,
}

/// One-shot command surface: discovery (cache-aware), per-device reads,
/// and the mutation operations the CLI-shaped callers bind to.
pub struct NetaudioClient {
    settings: Settings,
}

impl NetaudioClient {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn executor(&self) -> CommandExecutor {
        if self.settings.dump_payloads {
            CommandExecutor::with_dump_dir(PathBuf::from(DUMP_DIR))
        } else {
            CommandExecutor::new()
        }
    }

    fn open_cache(&self) -> Option<MdnsCache> {
        match MdnsCache::open(self.settings.cache_ttl, self.settings.cache_dir.as_deref()) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("mDNS cache unavailable, falling back to live discovery: {}", e);
                None
            }
        }
    }

    /// Discovers devices (honoring the cache unless `refresh` is set) and
    /// enumerates each one.
    pub async fn list_devices(&self) -> Result<HashMap<String, Device>> {
        let mut cache = self.open_cache();

        let mut devices: Option<HashMap<String, Device>> = None;
        if self.settings.refresh {
            if let Some(cache) = &mut cache {
                cache.clear();
            }
        } else if let Some(cache) = &mut cache {
            let mut cached = HashMap::new();
            for key in cache.keys() {
                if let Some(snapshot) = cache.get(&key) {
                    cached.insert(key.clone(), snapshot.into_device(&key));
                }
            }
            if !cached.is_empty() {
                debug!("serving {} device(s) from the mDNS cache", cached.len());
                devices = Some(cached);
            }
        }

        let mut devices = match devices {
            Some(devices) => devices,
            None => {
                let browser = MdnsBrowser::new(self.settings.mdns_timeout())?;
                let discovered = browser.get_devices().await?;
                browser.shutdown();

                if let Some(cache) = &mut cache {
                    for (server_name, device) in &discovered {
                        cache.set(server_name, &DeviceSnapshot::of(device));
                    }
                }
                discovered
            }
        };

        for (server_name, device) in &mut devices {
            device.set_executor(self.executor());
            if let Err(e) = device.get_controls().await {
                warn!("could not fully enumerate {}: {}", server_name, e);
            }
        }

        Ok(devices)
    }

    /// Resolves a filter to exactly one device.
    pub async fn find_device(&self, filter: &DeviceFilter) -> Result<Device> {
        if filter.is_empty() {
            return Err(NetaudioError::Precondition(
                "specify a device name or host".into(),
            ));
        }

        let devices = self.list_devices().await?;
        let mut matches: Vec<Device> = devices
            .into_values()
            .filter(|device| filter.matches(device))
            .collect();

        match matches.len() {
            0 => Err(NetaudioError::NotFound(format!(
                "no device matching {:?}",
                filter.name.as_deref().or(filter.host.as_deref()).unwrap_or("")
            ))),
            1 => Ok(matches.remove(0)),
            _ => Err(NetaudioError::Precondition(format!(
                "{} devices match, be more specific",
                matches.len()
            ))),
        }
    }

    pub async fn identify_device(&self, filter: &DeviceFilter) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.identify().await?;
        info!("identify sent to {}", device);
        Ok(())
    }

    pub async fn set_device_name(&self, filter: &DeviceFilter, name: &str) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_device_name(name).await?;
        Ok(())
    }

    pub async fn reset_device_name(&self, filter: &DeviceFilter) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.reset_device_name().await?;
        Ok(())
    }

    pub async fn set_channel_name(
        &self,
        filter: &DeviceFilter,
        direction: ChannelDirection,
        channel_number: u16,
        name: &str,
    ) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_channel_name(direction, channel_number, name).await?;
        Ok(())
    }

    pub async fn reset_channel_name(
        &self,
        filter: &DeviceFilter,
        direction: ChannelDirection,
        channel_number: u16,
    ) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.reset_channel_name(direction, channel_number).await?;
        Ok(())
    }

    pub async fn set_sample_rate(&self, filter: &DeviceFilter, sample_rate: u32) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_sample_rate(sample_rate).await?;
        Ok(())
    }

    pub async fn set_encoding(&self, filter: &DeviceFilter, encoding: u8) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_encoding(encoding).await?;
        Ok(())
    }

    pub async fn set_latency(&self, filter: &DeviceFilter, latency_ms: u32) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_latency(latency_ms).await?;
        Ok(())
    }

    pub async fn set_gain_level(
        &self,
        filter: &DeviceFilter,
        channel_number: u16,
        gain_level: u8,
        direction: GainDirection,
    ) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.set_gain_level(channel_number, gain_level, direction).await?;
        Ok(())
    }

    pub async fn enable_aes67(&self, filter: &DeviceFilter, enabled: bool) -> Result<()> {
        let mut device = self.find_device(filter).await?;
        device.enable_aes67(enabled).await?;
        Ok(())
    }

    /// Channel maps per device, optionally narrowed by a filter.
    pub async fn list_channels(&self, filter: Option<&DeviceFilter>) -> Result<Vec<ChannelListing>> {
        let devices = self.list_devices().await?;
        let mut listings: Vec<ChannelListing> = devices
            .values()
            .filter(|device| filter.map_or(true, |filter| filter.matches(device)))
            .map(ChannelListing::of)
            .collect();
        listings.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        Ok(listings)
    }

    /// One round of volume metering folded into the device's channels.
    /// Devices that cannot meter come back unchanged.
    pub async fn get_volume(&self, filter: &DeviceFilter) -> Result<Device> {
        let mut device = self.find_device(filter).await?;
        let local_ip = crate::config::local_ipv4(&self.settings).ok_or_else(|| {
            NetaudioError::Precondition("could not determine a local IPv4 address".into())
        })?;

        device.get_volume(local_ip, self.settings.metering_port).await?;
        Ok(device)
    }

    /// Every subscription on every reachable device.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let devices = self.list_devices().await?;
        Ok(devices
            .into_values()
            .flat_map(|device| device.subscriptions)
            .collect())
    }

    pub async fn add_subscription(&self, spec: &SubscriptionSpec) -> Result<()> {
        let devices = self.list_devices().await?;

        let mut rx_device = devices
            .values()
            .find(|device| spec.rx_device.matches(device))
            .cloned()
            .ok_or_else(|| NetaudioError::NotFound("receiver device not found".into()))?;

        let rx_channel = rx_device
            .rx_channels
            .values()
            .find(|channel| spec.rx_channel.matches(channel, false))
            .cloned()
            .ok_or_else(|| NetaudioError::NotFound(format!("no rx channel on {}", rx_device)))?;

        let (tx_channel_name, tx_device_name) = {
            let tx_device = match &spec.tx_device {
                Some(filter) => devices
                    .values()
                    .find(|device| filter.matches(device))
                    .ok_or_else(|| NetaudioError::NotFound("transmitter device not found".into()))?,
                None => &rx_device,
            };

            let tx_channel = tx_device
                .tx_channels
                .values()
                .find(|channel| spec.tx_channel.matches(channel, true))
                .ok_or_else(|| NetaudioError::NotFound(format!("no tx channel on {}", tx_device)))?;

            info!(
                "{}@{} <- {}@{}",
                rx_channel.name, rx_device, tx_channel.name, tx_device
            );
            (tx_channel.name.clone(), tx_device.name.clone())
        };

        rx_device
            .add_subscription(rx_channel.number, &tx_channel_name, &tx_device_name)
            .await?;
        Ok(())
    }

    pub async fn remove_subscription(
        &self,
        rx_device: &DeviceFilter,
        rx_channel: &ChannelSelector,
    ) -> Result<()> {
        let mut device = self.find_device(rx_device).await?;
        let channel = device
            .rx_channels
            .values()
            .find(|channel| rx_channel.matches(channel, false))
            .cloned()
            .ok_or_else(|| NetaudioError::NotFound(format!("no rx channel on {}", device)))?;

        device.remove_subscription(channel.number).await?;
        Ok(())
    }
}
