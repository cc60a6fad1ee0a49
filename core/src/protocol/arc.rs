//! Dialect 1: request/response frames on the audio-routing-control port.
//!
//! Every frame is `27 | nonce | length:u16 | sequence:u16 | command:u16 |
//! body`. The length field counts the whole frame and is authoritative on
//! the receive path; responses mirror the sequence and command ids.

use bytes::{BufMut, BytesMut};
use rand::Rng;

use super::{extract_label, read_u16, read_u24};
use crate::consts::ArcCommand;
use crate::error::{NetaudioError, Result};

pub const ARC_MAGIC: u8 = 0x27;
const HEADER_LEN: usize = 8;

/// Byte offset of the tx-channel-name field inside an add-subscription
/// frame. The tx-device name follows the channel name's NUL.
const SUBSCRIPTION_NAME_OFFSET: u8 = 52;

/// A dialect-1 request, ready to encode.
#[derive(Debug, Clone)]
pub struct ArcRequest {
    pub nonce: u8,
    pub sequence_id: u16,
    pub command: ArcCommand,
    pub body: Vec<u8>,
}

impl ArcRequest {
    pub fn new(command: ArcCommand, body: Vec<u8>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            nonce: rng.gen(),
            sequence_id: rng.gen(),
            command,
            body,
        }
    }

    /// Same as [`ArcRequest::new`] with caller-chosen ids, for byte-exact
    /// frame checks against captured traffic.
    pub fn with_ids(nonce: u8, sequence_id: u16, command: ArcCommand, body: Vec<u8>) -> Self {
        Self {
            nonce,
            sequence_id,
            command,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_u8(ARC_MAGIC);
        buf.put_u8(self.nonce);
        buf.put_u16((HEADER_LEN + self.body.len()) as u16);
        buf.put_u16(self.sequence_id);
        buf.put_u16(self.command.id());
        buf.put_slice(&self.body);
        buf.to_vec()
    }
}

fn pagination_body(page: u8) -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x01, 0x00, (page << 4) | 0x01, 0x00, 0x00]
}

pub fn channel_counts() -> ArcRequest {
    ArcRequest::new(ArcCommand::ChannelCounts, vec![0x00, 0x00])
}

pub fn device_info() -> ArcRequest {
    ArcRequest::new(ArcCommand::DeviceInfo, vec![0x00, 0x00])
}

pub fn device_name() -> ArcRequest {
    ArcRequest::new(ArcCommand::DeviceName, vec![0x00, 0x00])
}

pub fn set_device_name(name: &str) -> Result<ArcRequest> {
    if name.is_empty() {
        return Err(NetaudioError::Precondition(
            "device name must not be empty".into(),
        ));
    }

    let mut body = vec![0x00, 0x00];
    body.extend_from_slice(name.as_bytes());
    body.push(0x00);
    Ok(ArcRequest::new(ArcCommand::SetDeviceName, body))
}

pub fn reset_device_name() -> ArcRequest {
    ArcRequest::new(ArcCommand::SetDeviceName, vec![0x00, 0x00])
}

pub fn receivers(page: u8) -> ArcRequest {
    ArcRequest::new(ArcCommand::RxChannels, pagination_body(page))
}

pub fn transmitters(page: u8, friendly_names: bool) -> ArcRequest {
    let command = if friendly_names {
        ArcCommand::TxChannelFriendlyNames
    } else {
        ArcCommand::TxChannels
    };
    ArcRequest::new(command, pagination_body(page))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelDirection {
    Rx,
    Tx,
}

impl std::fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelDirection::Rx => write!(f, "rx"),
            ChannelDirection::Tx => write!(f, "tx"),
        }
    }
}

pub fn set_channel_name(
    direction: ChannelDirection,
    channel_number: u16,
    new_name: &str,
) -> Result<ArcRequest> {
    if channel_number == 0 {
        return Err(NetaudioError::Precondition(
            "channel numbers start at 1".into(),
        ));
    }
    if new_name.is_empty() {
        return Err(NetaudioError::Precondition(
            "channel name must not be empty".into(),
        ));
    }

    let ch = channel_number as u8;
    let (command, mut body) = match direction {
        ChannelDirection::Rx => (
            ArcCommand::SetRxChannelName,
            vec![0x00, 0x00, 0x02, 0x01, 0x00, ch, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00],
        ),
        ChannelDirection::Tx => (
            ArcCommand::SetTxChannelName,
            vec![
                0x00, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00, ch, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00,
            ],
        ),
    };

    body.extend_from_slice(new_name.as_bytes());
    body.push(0x00);
    Ok(ArcRequest::new(command, body))
}

pub fn reset_channel_name(direction: ChannelDirection, channel_number: u16) -> Result<ArcRequest> {
    if channel_number == 0 {
        return Err(NetaudioError::Precondition(
            "channel numbers start at 1".into(),
        ));
    }

    let ch = channel_number as u8;
    let (command, body) = match direction {
        ChannelDirection::Rx => (
            ArcCommand::SetRxChannelName,
            vec![0x00, 0x00, 0x02, 0x01, 0x00, ch, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00],
        ),
        ChannelDirection::Tx => (
            ArcCommand::SetTxChannelName,
            vec![
                0x00, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00, ch, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ],
        ),
    };

    Ok(ArcRequest::new(command, body))
}

pub fn add_subscription(
    rx_channel_number: u16,
    tx_channel_name: &str,
    tx_device_name: &str,
) -> Result<ArcRequest> {
    if rx_channel_number == 0 {
        return Err(NetaudioError::Precondition(
            "channel numbers start at 1".into(),
        ));
    }

    let channel_offset = SUBSCRIPTION_NAME_OFFSET;
    let device_offset = channel_offset as usize + tx_channel_name.len() + 1;
    if device_offset > u8::MAX as usize {
        return Err(NetaudioError::Precondition(
            "tx channel name too long for subscription frame".into(),
        ));
    }

    let mut body = vec![
        0x00,
        0x00,
        0x02,
        0x01,
        0x00,
        rx_channel_number as u8,
        0x00,
        channel_offset,
        0x00,
        device_offset as u8,
    ];
    body.extend_from_slice(&[0u8; 34]);
    body.extend_from_slice(tx_channel_name.as_bytes());
    body.push(0x00);
    body.extend_from_slice(tx_device_name.as_bytes());
    body.push(0x00);

    Ok(ArcRequest::new(ArcCommand::AddSubscription, body))
}

pub fn remove_subscription(rx_channel_number: u16) -> Result<ArcRequest> {
    if rx_channel_number == 0 {
        return Err(NetaudioError::Precondition(
            "channel numbers start at 1".into(),
        ));
    }

    Ok(ArcRequest::new(
        ArcCommand::RemoveSubscription,
        vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, rx_channel_number as u8],
    ))
}

/// Fixed 40-byte latency template with the requested latency, in
/// microseconds, in two 24-bit fields. Callers pass milliseconds.
pub fn set_latency(latency_ms: u32) -> ArcRequest {
    let micros = latency_ms * 1000;
    let micros_be = [(micros >> 16) as u8, (micros >> 8) as u8, micros as u8];

    let mut body = vec![
        0x00, 0x00, 0x05, 0x03, 0x82, 0x05, 0x00, 0x20, 0x02, 0x11, 0x00, 0x10, 0x83, 0x01, 0x00,
        0x24, 0x82, 0x19, 0x83, 0x01, 0x83, 0x02, 0x83, 0x06, 0x00,
    ];
    body.extend_from_slice(&micros_be);
    body.push(0x00);
    body.extend_from_slice(&micros_be);

    ArcRequest::new(ArcCommand::SetLatency, body)
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Validates magic and the authoritative length field, returning the frame
/// trimmed to its stated length.
fn arc_payload(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < HEADER_LEN {
        return Err(NetaudioError::InvalidFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != ARC_MAGIC {
        return Err(NetaudioError::InvalidFrame(format!(
            "bad magic 0x{:02x}",
            frame[0]
        )));
    }

    let stated = read_u16(frame, 2).unwrap_or(0) as usize;
    if stated < HEADER_LEN || stated > frame.len() {
        return Err(NetaudioError::InvalidFrame(format!(
            "stated length {} outside frame of {} bytes",
            stated,
            frame.len()
        )));
    }

    Ok(&frame[..stated])
}

pub fn response_sequence_id(frame: &[u8]) -> Option<u16> {
    read_u16(frame, 4)
}

pub fn response_command_id(frame: &[u8]) -> Option<u16> {
    read_u16(frame, 6)
}

/// Device-name response: ASCII name at bytes 10..end, trailing pad byte
/// stripped.
pub fn parse_device_name(frame: &[u8]) -> Result<String> {
    let payload = arc_payload(frame)?;
    if payload.len() < 11 {
        return Err(NetaudioError::InvalidFrame(
            "name response shorter than 11 bytes".into(),
        ));
    }

    let name = &payload[10..payload.len() - 1];
    String::from_utf8(name.to_vec())
        .map_err(|_| NetaudioError::InvalidFrame("device name is not valid UTF-8".into()))
}

/// Channel-count response: tx count at byte 13, rx count at byte 15 (8-bit
/// counts carried in 16-bit words).
pub fn parse_channel_counts(frame: &[u8]) -> Result<(u16, u16)> {
    let payload = arc_payload(frame)?;
    if payload.len() < 16 {
        return Err(NetaudioError::InvalidFrame(
            "channel-count response shorter than 16 bytes".into(),
        ));
    }

    Ok((payload[13] as u16, payload[15] as u16))
}

const PAGE_HEADER_LEN: usize = 12;
const RX_RECORD_LEN: usize = 20;
const TX_RECORD_LEN: usize = 8;
const FRIENDLY_RECORD_LEN: usize = 6;

pub const RX_PAGE_SIZE: usize = 16;
pub const TX_PAGE_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct RxChannelRecord {
    pub number: u16,
    pub rate_hint: u16,
    pub tx_channel_offset: u16,
    pub tx_device_offset: u16,
    pub rx_channel_offset: u16,
    pub channel_status: u16,
    pub subscription_status: u16,
    pub rx_channel_name: String,
    pub tx_channel_name: String,
    pub tx_device_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct RxChannelsPage {
    pub channels: Vec<RxChannelRecord>,
    pub sample_rate: Option<u32>,
}

/// Parses one rx-channels page: a 12-byte header followed by 20-byte
/// records, of which the first 16 bytes are eight big-endian fields.
/// A zero tx-channel offset means "same as the rx name".
pub fn parse_rx_channels(frame: &[u8], limit: usize) -> Result<RxChannelsPage> {
    let payload = arc_payload(frame)?;
    let mut page = RxChannelsPage::default();

    for index in 0..limit.min(RX_PAGE_SIZE) {
        let base = PAGE_HEADER_LEN + index * RX_RECORD_LEN;
        if base + 16 > payload.len() {
            break;
        }

        let number = read_u16(payload, base).unwrap_or(0);
        if number == 0 {
            break;
        }

        let rate_hint = read_u16(payload, base + 4).unwrap_or(0);
        let tx_channel_offset = read_u16(payload, base + 6).unwrap_or(0);
        let tx_device_offset = read_u16(payload, base + 8).unwrap_or(0);
        let rx_channel_offset = read_u16(payload, base + 10).unwrap_or(0);
        let channel_status = read_u16(payload, base + 12).unwrap_or(0);
        let subscription_status = read_u16(payload, base + 14).unwrap_or(0);

        let rx_channel_name = extract_label(payload, rx_channel_offset);
        let tx_device_name = extract_label(payload, tx_device_offset);
        let tx_channel_name = if tx_channel_offset != 0 {
            extract_label(payload, tx_channel_offset)
        } else {
            rx_channel_name.clone()
        };

        if index == 0 && tx_device_offset != 0 {
            if let Some(rate) = read_u24(payload, rate_hint as usize + 1) {
                if rate != 0 {
                    page.sample_rate = Some(rate);
                }
            }
        }

        page.channels.push(RxChannelRecord {
            number,
            rate_hint,
            tx_channel_offset,
            tx_device_offset,
            rx_channel_offset,
            channel_status,
            subscription_status,
            rx_channel_name,
            tx_channel_name,
            tx_device_name,
        });
    }

    Ok(page)
}

#[derive(Debug, Clone)]
pub struct TxChannelRecord {
    pub number: u16,
    pub status: u16,
    pub channel_group: u16,
    pub name_offset: u16,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TxChannelsPage {
    pub channels: Vec<TxChannelRecord>,
    pub sample_rate: Option<u32>,
    /// True when a record's channel-group differed from the first record's;
    /// the remaining slots on the page are disabled and were not read.
    pub stopped_on_group_change: bool,
}

/// Parses one tx-channels page of 8-byte records. The channel-group field
/// doubles as a pointer to the page's sample-rate block.
pub fn parse_tx_channels(frame: &[u8], limit: usize) -> Result<TxChannelsPage> {
    let payload = arc_payload(frame)?;
    let mut page = TxChannelsPage::default();
    let mut first_group = None;

    for index in 0..limit.min(TX_PAGE_SIZE) {
        let base = PAGE_HEADER_LEN + index * TX_RECORD_LEN;
        if base + TX_RECORD_LEN > payload.len() {
            break;
        }

        let number = read_u16(payload, base).unwrap_or(0);
        let status = read_u16(payload, base + 2).unwrap_or(0);
        let channel_group = read_u16(payload, base + 4).unwrap_or(0);
        let name_offset = read_u16(payload, base + 6).unwrap_or(0);

        if let Some(rate) = read_u24(payload, channel_group as usize + 1) {
            if rate != 0 {
                page.sample_rate = Some(rate);
            }
        }

        if number == 0 {
            break;
        }

        match first_group {
            None => first_group = Some(channel_group),
            Some(group) if group != channel_group => {
                page.stopped_on_group_change = true;
                break;
            }
            Some(_) => {}
        }

        let name = extract_label(payload, name_offset);
        page.channels.push(TxChannelRecord {
            number,
            status,
            channel_group,
            name_offset,
            name,
        });
    }

    Ok(page)
}

/// Friendly-name overlay page: 6-byte records of (index, channel number,
/// label offset). Entries with empty labels are skipped.
pub fn parse_tx_friendly_names(frame: &[u8], limit: usize) -> Result<Vec<(u16, String)>> {
    let payload = arc_payload(frame)?;
    let mut names = Vec::new();

    for index in 0..limit.min(TX_PAGE_SIZE) {
        let base = PAGE_HEADER_LEN + index * FRIENDLY_RECORD_LEN;
        if base + FRIENDLY_RECORD_LEN > payload.len() {
            break;
        }

        let number = read_u16(payload, base + 2).unwrap_or(0);
        let offset = read_u16(payload, base + 4).unwrap_or(0);
        if number == 0 {
            break;
        }

        let name = extract_label(payload, offset);
        if !name.is_empty() {
            names.push((number, name));
        }
    }

    Ok(names)
}

/// Counts byte-aligned occurrences of a 24-bit sample-rate pattern inside a
/// frame. A doubled rate marks a tx page whose tail slots are disabled.
pub fn sample_rate_occurrences(frame: &[u8], sample_rate: u32) -> usize {
    let pattern = [
        (sample_rate >> 16) as u8,
        (sample_rate >> 8) as u8,
        sample_rate as u8,
    ];
    frame.windows(3).filter(|window| *window == pattern).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_request_is_byte_exact() {
        let request = ArcRequest::with_ids(0xff, 0xc546, ArcCommand::DeviceName, vec![0, 0]);
        assert_eq!(
            request.encode(),
            [0x27, 0xff, 0x00, 0x0a, 0xc5, 0x46, 0x10, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn channel_count_request_is_byte_exact() {
        let request = ArcRequest::with_ids(0xff, 0xf215, ArcCommand::ChannelCounts, vec![0, 0]);
        assert_eq!(
            request.encode(),
            [0x27, 0xff, 0x00, 0x0a, 0xf2, 0x15, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn receivers_request_is_byte_exact() {
        let mut request = receivers(0);
        request.nonce = 0xff;
        request.sequence_id = 0xb1c2;
        assert_eq!(
            request.encode(),
            [
                0x27, 0xff, 0x00, 0x10, 0xb1, 0xc2, 0x30, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x01, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn transmitters_requests_differ_only_in_command_id() {
        let mut plain = transmitters(2, false);
        plain.nonce = 0xff;
        plain.sequence_id = 0x1a2b;
        assert_eq!(
            plain.encode(),
            [
                0x27, 0xff, 0x00, 0x10, 0x1a, 0x2b, 0x20, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x21, 0x00, 0x00
            ]
        );

        let mut friendly = transmitters(2, true);
        friendly.nonce = 0xff;
        friendly.sequence_id = 0x1a2b;
        assert_eq!(&friendly.encode()[6..8], [0x20, 0x10]);
    }

    #[test]
    fn device_info_request_uses_its_own_command_id() {
        let frame = device_info().encode();
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[6..8], [0x10, 0x03]);
    }

    #[test]
    fn pagination_encodes_page_in_high_nibble() {
        assert_eq!(pagination_body(0)[5], 0x01);
        assert_eq!(pagination_body(1)[5], 0x11);
        assert_eq!(pagination_body(2)[5], 0x21);
        assert_eq!(pagination_body(6)[5], 0x61);
    }

    #[test]
    fn set_device_name_appends_nul_and_updates_length() {
        let frame = set_device_name("lx-dante").unwrap().encode();
        // 8-byte header + 2 reserved + name + NUL
        assert_eq!(frame.len(), 8 + 2 + 8 + 1);
        assert_eq!(frame[2], 0x00);
        assert_eq!(frame[3], frame.len() as u8);
        assert_eq!(&frame[10..18], b"lx-dante");
        assert_eq!(frame[18], 0x00);
    }

    #[test]
    fn reset_device_name_has_empty_args() {
        let frame = reset_device_name().encode();
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[6..10], [0x10, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn set_rx_channel_name_layout() {
        let frame = set_channel_name(ChannelDirection::Rx, 2, "mix").unwrap().encode();
        assert_eq!(frame.len(), 21 + 3);
        assert_eq!(read_u16(&frame, 6), Some(0x3001));
        assert_eq!(frame[13], 2);
        assert_eq!(&frame[20..23], b"mix");
        assert_eq!(*frame.last().unwrap(), 0x00);
    }

    #[test]
    fn set_tx_channel_name_layout() {
        let frame = set_channel_name(ChannelDirection::Tx, 3, "mix").unwrap().encode();
        assert_eq!(frame.len(), 25 + 3);
        assert_eq!(read_u16(&frame, 6), Some(0x2013));
        assert_eq!(frame[15], 3);
    }

    #[test]
    fn reset_channel_name_lengths_match_captures() {
        assert_eq!(
            reset_channel_name(ChannelDirection::Rx, 1).unwrap().encode().len(),
            21
        );
        assert_eq!(
            reset_channel_name(ChannelDirection::Tx, 1).unwrap().encode().len(),
            25
        );
    }

    #[test]
    fn empty_channel_name_is_a_precondition_error() {
        let err = set_channel_name(ChannelDirection::Rx, 1, "").unwrap_err();
        assert!(matches!(err, NetaudioError::Precondition(_)));
    }

    #[test]
    fn add_subscription_places_names_at_documented_offsets() {
        let frame = add_subscription(1, "mic-mix-high", "lx-dante").unwrap().encode();

        assert_eq!(frame[13], 1, "rx channel number byte");
        assert_eq!(frame[15], 52, "tx channel name offset");
        assert_eq!(frame[17], 52 + 13, "tx device name offset");
        assert_eq!(&frame[52..64], b"mic-mix-high");
        assert_eq!(frame[64], 0x00);
        assert_eq!(&frame[65..73], b"lx-dante");
        assert_eq!(frame[73], 0x00);
        assert_eq!(read_u16(&frame, 2).unwrap() as usize, frame.len());
    }

    #[test]
    fn remove_subscription_carries_channel_in_last_byte() {
        let frame = remove_subscription(7).unwrap().encode();
        assert_eq!(frame.len(), 16);
        assert_eq!(frame[2..4], [0x00, 0x10]);
        assert_eq!(*frame.last().unwrap(), 7);
    }

    #[test]
    fn set_latency_encodes_microseconds_twice() {
        let frame = set_latency(5).encode();
        assert_eq!(frame.len(), 40);
        assert_eq!(frame[2..4], [0x00, 0x28]);
        // 5 ms -> 5000 us = 0x001388, twice, separated by one zero byte
        assert_eq!(&frame[33..36], &[0x00, 0x13, 0x88]);
        assert_eq!(frame[36], 0x00);
        assert_eq!(&frame[37..40], &[0x00, 0x13, 0x88]);
    }

    fn name_response(name: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x27, 0xff, 0x00, 0x00, 0xc5, 0x46, 0x10, 0x02, 0x00, 0x00];
        frame.extend_from_slice(name);
        frame.push(0x00);
        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());
        frame
    }

    #[test]
    fn parse_device_name_strips_trailing_pad() {
        let frame = name_response(b"lx-dante");
        assert_eq!(parse_device_name(&frame).unwrap(), "lx-dante");

        let frame = name_response(b"avio-usb-2");
        assert_eq!(parse_device_name(&frame).unwrap(), "avio-usb-2");
    }

    #[test]
    fn parse_device_name_rejects_truncation() {
        let mut frame = name_response(b"lx-dante");
        frame[3] += 4; // stated length now exceeds the datagram
        assert!(matches!(
            parse_device_name(&frame),
            Err(NetaudioError::InvalidFrame(_))
        ));
    }

    #[test]
    fn parse_channel_counts_reads_bytes_13_and_15() {
        let frame = [
            0x27, 0xff, 0x00, 0x10, 0xf2, 0x15, 0x10, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x80,
            0x00, 0x80,
        ];
        assert_eq!(parse_channel_counts(&frame).unwrap(), (128, 128));

        let frame = [
            0x27, 0xff, 0x00, 0x10, 0x40, 0x9b, 0x10, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02,
            0x00, 0x01,
        ];
        assert_eq!(parse_channel_counts(&frame).unwrap(), (2, 1));
    }

    #[test]
    fn bad_magic_is_invalid_frame() {
        let frame = [0x28u8, 0xff, 0x00, 0x0a, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00];
        assert!(matches!(
            parse_channel_counts(&frame),
            Err(NetaudioError::InvalidFrame(_))
        ));
    }

    /// Builds an rx-channels page shaped like the avio-usb-2 capture: two
    /// channels, both subscribed to mic-mix-high@lx-dante, rx status 0x0101
    /// and subscription status 9 (connected, unicast).
    fn rx_page_fixture() -> Vec<u8> {
        let mut frame = vec![0x27, 0xff, 0x00, 0x00, 0xb1, 0xc2, 0x30, 0x00, 0x00, 0x00, 0x00, 0x02];

        let rx1_off: u16 = 52;
        let rx2_off: u16 = 62;
        let tx_off: u16 = 72;
        let dev_off: u16 = 85;
        let rate_hint: u16 = 94;

        for (number, rx_off) in [(1u16, rx1_off), (2u16, rx2_off)] {
            frame.extend_from_slice(&number.to_be_bytes());
            frame.extend_from_slice(&[0x00, 0x00]); // reserved
            frame.extend_from_slice(&rate_hint.to_be_bytes());
            frame.extend_from_slice(&tx_off.to_be_bytes());
            frame.extend_from_slice(&dev_off.to_be_bytes());
            frame.extend_from_slice(&rx_off.to_be_bytes());
            frame.extend_from_slice(&0x0101u16.to_be_bytes());
            frame.extend_from_slice(&0x0009u16.to_be_bytes());
            frame.extend_from_slice(&[0x00; 4]); // record tail
        }

        frame.extend_from_slice(b"mic-mix-1\0");
        frame.extend_from_slice(b"mic-mix-2\0");
        frame.extend_from_slice(b"mic-mix-high\0");
        frame.extend_from_slice(b"lx-dante\0");
        frame.push(0x00); // rate block: hint + 1 points at the next byte
        frame.extend_from_slice(&[0x00, 0xbb, 0x80]);

        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());
        frame
    }

    #[test]
    fn parse_rx_channels_resolves_labels_and_statuses() {
        let page = parse_rx_channels(&rx_page_fixture(), 2).unwrap();
        assert_eq!(page.channels.len(), 2);
        assert_eq!(page.sample_rate, Some(48_000));

        let first = &page.channels[0];
        assert_eq!(first.number, 1);
        assert_eq!(first.rx_channel_name, "mic-mix-1");
        assert_eq!(first.tx_channel_name, "mic-mix-high");
        assert_eq!(first.tx_device_name, "lx-dante");
        assert_eq!(first.channel_status, 257);
        assert_eq!(first.subscription_status, 9);

        let second = &page.channels[1];
        assert_eq!(second.number, 2);
        assert_eq!(second.rx_channel_name, "mic-mix-2");
        assert_eq!(second.tx_channel_name, "mic-mix-high");
    }

    #[test]
    fn zero_tx_offset_falls_back_to_rx_name() {
        let mut frame = vec![0x27, 0xff, 0x00, 0x00, 0x00, 0x01, 0x30, 0x00, 0x00, 0x00, 0x00, 0x01];
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&0u16.to_be_bytes()); // rate hint
        frame.extend_from_slice(&0u16.to_be_bytes()); // tx channel offset: self
        frame.extend_from_slice(&0u16.to_be_bytes()); // tx device offset: none
        frame.extend_from_slice(&32u16.to_be_bytes()); // rx name offset
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&[0x00; 4]);
        frame.extend_from_slice(b"spdif-l\0");
        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());

        let page = parse_rx_channels(&frame, 16).unwrap();
        assert_eq!(page.channels.len(), 1);
        assert_eq!(page.channels[0].rx_channel_name, "spdif-l");
        assert_eq!(page.channels[0].tx_channel_name, "spdif-l");
        assert_eq!(page.channels[0].tx_device_name, "");
        assert_eq!(page.sample_rate, None, "no rate read without a device offset");
    }

    fn tx_page_fixture(groups: &[u16]) -> Vec<u8> {
        let mut frame = vec![0x27, 0xff, 0x00, 0x00, 0x00, 0x02, 0x20, 0x00, 0x00, 0x00, 0x00, 0x02];
        let name_off = (PAGE_HEADER_LEN + groups.len() * TX_RECORD_LEN) as u16;

        for (index, group) in groups.iter().enumerate() {
            frame.extend_from_slice(&(index as u16 + 1).to_be_bytes());
            frame.extend_from_slice(&0u16.to_be_bytes());
            frame.extend_from_slice(&group.to_be_bytes());
            frame.extend_from_slice(&name_off.to_be_bytes());
        }
        frame.extend_from_slice(b"audio-out\0");

        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());
        frame
    }

    #[test]
    fn tx_parse_stops_on_channel_group_change() {
        let page = parse_tx_channels(&tx_page_fixture(&[0x0040, 0x0040, 0x0080]), 32).unwrap();
        assert_eq!(page.channels.len(), 2);
        assert!(page.stopped_on_group_change);
    }

    #[test]
    fn tx_parse_keeps_uniform_groups() {
        let page = parse_tx_channels(&tx_page_fixture(&[0x0040, 0x0040, 0x0040]), 32).unwrap();
        assert_eq!(page.channels.len(), 3);
        assert!(!page.stopped_on_group_change);
        assert_eq!(page.channels[0].name, "audio-out");
    }

    #[test]
    fn friendly_names_skip_unnamed_channels() {
        let mut frame = vec![0x27, 0xff, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10, 0x00, 0x00, 0x00, 0x02];
        let name_off = (PAGE_HEADER_LEN + 2 * FRIENDLY_RECORD_LEN) as u16;
        // channel 1 has a friendly name, channel 2 does not
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&name_off.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(b"Lead Vocal\0");
        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());

        let names = parse_tx_friendly_names(&frame, 32).unwrap();
        assert_eq!(names, vec![(1, "Lead Vocal".to_string())]);
    }

    #[test]
    fn doubled_sample_rate_is_detected() {
        let mut frame = tx_page_fixture(&[0x0040]);
        frame.extend_from_slice(&[0x00, 0xbb, 0x80]);
        assert_eq!(sample_rate_occurrences(&frame, 48_000), 1);
        frame.extend_from_slice(&[0x00, 0xbb, 0x80]);
        assert_eq!(sample_rate_occurrences(&frame, 48_000), 2);
    }
}
