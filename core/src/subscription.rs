use serde::{Deserialize, Serialize};

/// Subscription status codes reported in rx-channel records.
pub const SUBSCRIPTION_NONE: u16 = 0;
pub const SUBSCRIPTION_UNRESOLVED: u16 = 1;
pub const SUBSCRIPTION_RESOLVE_FAIL: u16 = 3;
pub const SUBSCRIPTION_SELF_SUBSCRIBED: u16 = 4;
pub const SUBSCRIPTION_IN_PROGRESS: u16 = 8;
pub const SUBSCRIPTION_DYNAMIC: u16 = 9;
pub const SUBSCRIPTION_STATIC: u16 = 10;
pub const SUBSCRIPTION_CHANNEL_FORMAT: u16 = 16;

/// Human label for a subscription or rx-channel status code. Channel
/// records reuse the same code space.
pub fn status_label(code: u16) -> Option<&'static str> {
    match code {
        SUBSCRIPTION_NONE => Some("No subscription"),
        SUBSCRIPTION_UNRESOLVED => Some("Subscription unresolved"),
        SUBSCRIPTION_RESOLVE_FAIL => Some("Can't resolve subscription"),
        SUBSCRIPTION_SELF_SUBSCRIBED => Some("Subscribed to own signal"),
        SUBSCRIPTION_IN_PROGRESS => Some("Subscription in progress"),
        SUBSCRIPTION_DYNAMIC => Some("Connected (Unicast)"),
        SUBSCRIPTION_STATIC => Some("Connected (Multicast)"),
        SUBSCRIPTION_CHANNEL_FORMAT => Some("Incorrect channel format"),
        _ => None,
    }
}

/// A logical wire from a transmit channel somewhere on the network to a
/// receive channel on the owning device. Devices are referenced by name
/// only; resolution back to a live device goes through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub rx_channel_name: String,
    pub rx_device_name: String,
    pub tx_channel_name: String,
    pub tx_device_name: String,
    pub status_code: u16,
    pub rx_channel_status_code: u16,
}

impl Subscription {
    /// Subscription label plus the rx-channel label when that code is in
    /// the shared table.
    pub fn status_text(&self) -> Vec<&'static str> {
        let mut text = Vec::new();
        if let Some(label) = status_label(self.status_code) {
            text.push(label);
        }
        if self.rx_channel_status_code != self.status_code {
            if let Some(label) = status_label(self.rx_channel_status_code) {
                text.push(label);
            }
        }
        text
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tx_channel_name.is_empty() {
            write!(f, "{}@{}", self.rx_channel_name, self.rx_device_name)?;
        } else {
            write!(
                f,
                "{}@{} <- {}@{}",
                self.rx_channel_name, self.rx_device_name, self.tx_channel_name, self.tx_device_name
            )?;
        }

        let status = self.status_text();
        if !status.is_empty() {
            write!(f, " [{}]", status.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_cover_the_documented_codes() {
        assert_eq!(status_label(0), Some("No subscription"));
        assert_eq!(status_label(1), Some("Subscription unresolved"));
        assert_eq!(status_label(3), Some("Can't resolve subscription"));
        assert_eq!(status_label(4), Some("Subscribed to own signal"));
        assert_eq!(status_label(8), Some("Subscription in progress"));
        assert_eq!(status_label(9), Some("Connected (Unicast)"));
        assert_eq!(status_label(10), Some("Connected (Multicast)"));
        assert_eq!(status_label(16), Some("Incorrect channel format"));
        assert_eq!(status_label(257), None);
    }

    #[test]
    fn display_includes_both_sides_and_status() {
        let sub = Subscription {
            rx_channel_name: "mic-mix-1".into(),
            rx_device_name: "avio-usb-2".into(),
            tx_channel_name: "mic-mix-high".into(),
            tx_device_name: "lx-dante".into(),
            status_code: SUBSCRIPTION_DYNAMIC,
            rx_channel_status_code: 257,
        };

        assert_eq!(
            sub.to_string(),
            "mic-mix-1@avio-usb-2 <- mic-mix-high@lx-dante [Connected (Unicast)]"
        );
    }

    #[test]
    fn display_without_tx_side() {
        let sub = Subscription {
            rx_channel_name: "unused-1".into(),
            rx_device_name: "avio-aes3-1".into(),
            tx_channel_name: String::new(),
            tx_device_name: String::new(),
            status_code: SUBSCRIPTION_NONE,
            rx_channel_status_code: SUBSCRIPTION_NONE,
        };

        assert_eq!(sub.to_string(), "unused-1@avio-aes3-1 [No subscription]");
    }
}
