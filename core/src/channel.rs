use serde::{Deserialize, Serialize};

use crate::protocol::arc::ChannelDirection;
use crate::subscription::status_label;

/// Channel status codes from tx/rx enumeration responses.
pub const CHANNEL_OK: u16 = 0x0000;
pub const CHANNEL_UNRESOLVED: u16 = 0x0001;
pub const CHANNEL_OK_SELF: u16 = 0x0004;
pub const CHANNEL_OK_REMOTE: u16 = 0x0009;
pub const CHANNEL_FORMAT_MISMATCH: u16 = 0x0010;

/// Volume byte a device reports for channels it does not meter.
pub const VOLUME_UNMETERED: u8 = 254;

/// A numbered input (rx) or output (tx) on a device. Carries the owning
/// device's name rather than a handle; lookups go through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub direction: ChannelDirection,
    pub device_name: String,
    pub number: u16,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
}

impl Channel {
    pub fn new(direction: ChannelDirection, device_name: &str, number: u16, name: String) -> Self {
        Self {
            direction,
            device_name: device_name.to_string(),
            number,
            name,
            friendly_name: None,
            status_code: None,
            volume: None,
        }
    }

    /// Friendly name when the device carries one, wire name otherwise.
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }

    pub fn status_text(&self) -> Option<&'static str> {
        status_label(self.status_code?)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.volume {
            Some(volume) if volume != VOLUME_UNMETERED => {
                write!(f, "{}:{} [{}]", self.number, self.display_name(), volume)
            }
            _ => write!(f, "{}:{}", self.number, self.display_name()),
        }
    }
}
