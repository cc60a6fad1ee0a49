pub mod cache;
pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod consts;
pub mod daemon;
pub mod device;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod sockets;
pub mod subscription;

pub use cache::{DeviceSnapshot, MdnsCache, SharedStore};
pub use channel::Channel;
pub use client::{ChannelListing, ChannelSelector, DeviceFilter, NetaudioClient, SubscriptionSpec};
pub use config::{Settings, available_interfaces, local_ipv4};
pub use daemon::NetaudioDaemon;
pub use device::{Device, DeviceView, ServiceEndpoint, StatusBlob};
pub use discovery::MdnsBrowser;
pub use error::{NetaudioError, Result};
pub use monitor::{MonitorEvent, MulticastMonitor};
pub use protocol::arc::ChannelDirection;
pub use protocol::settings::GainDirection;
pub use registry::{DeviceHandle, Registry};
pub use subscription::Subscription;
