//! Dialect 2: device-settings / device-info framing.
//!
//! Frames open with `ffff`, a big-endian length, a caller-chosen sequence
//! id, a flags word, the sender MAC (or zeros), the vendor magic and a
//! dialect tag; the command id sits at bytes 26..28. Requests go to fixed
//! destination ports; status replies arrive on the control-monitoring
//! multicast group.

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use super::read_u16;
use crate::error::{NetaudioError, Result};

pub const SETTINGS_MAGIC: [u8; 2] = [0xff, 0xff];
/// ASCII "Audinate".
pub const VENDOR_MAGIC: [u8; 8] = [0x41, 0x75, 0x64, 0x69, 0x6e, 0x61, 0x74, 0x65];

pub const TAG_DEVICE_INFO: u16 = 0x0731;
pub const TAG_DEVICE_SETTINGS: u16 = 0x0727;
pub const TAG_INTEROP: u16 = 0x0734;

pub const ZERO_MAC: [u8; 6] = [0; 6];
/// MAC carried by the captured settings frames; devices do not appear to
/// check it.
const CAPTURE_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x00];
/// Vendor test MAC embedded in the captured interop-mode frames.
const INTEROP_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x38, 0x5e, 0xba];

/// Assembles a dialect-2 frame. `body` starts with the command id.
pub fn settings_frame(sequence_id: u16, flags: u16, mac: [u8; 6], tag: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(26 + body.len());
    buf.put_slice(&SETTINGS_MAGIC);
    buf.put_u16((26 + body.len()) as u16);
    buf.put_u16(sequence_id);
    buf.put_u16(flags);
    buf.put_slice(&mac);
    buf.put_u16(0);
    buf.put_slice(&VENDOR_MAGIC);
    buf.put_u16(tag);
    buf.put_slice(body);
    buf.to_vec()
}

/// Makes the device flash its identify LED.
pub fn identify() -> Vec<u8> {
    settings_frame(
        0x0bc8,
        0x0000,
        ZERO_MAC,
        TAG_DEVICE_INFO,
        &[0x00, 0x63, 0x00, 0x00, 0x00, 0x64],
    )
}

/// Asks for a make/model report; the status reply arrives on the
/// control-monitoring group with message id 192.
pub fn make_model_query(mac: [u8; 6]) -> Vec<u8> {
    settings_frame(
        0x0fdb,
        0x0000,
        mac,
        TAG_DEVICE_INFO,
        &[0x00, 0xc1, 0x00, 0x00, 0x00, 0x00],
    )
}

/// Asks for a versions report (vendor model string and model id); the
/// status reply arrives with message id 96.
pub fn versions_query(mac: [u8; 6]) -> Vec<u8> {
    settings_frame(
        0x0fdb,
        0x0000,
        mac,
        TAG_DEVICE_INFO,
        &[0x00, 0x61, 0x00, 0x00, 0x00, 0x00],
    )
}

pub fn set_sample_rate(sample_rate: u32) -> Vec<u8> {
    let mut body = vec![
        0x00, 0x81, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x01, 0x00,
    ];
    body.extend_from_slice(&[
        (sample_rate >> 16) as u8,
        (sample_rate >> 8) as u8,
        sample_rate as u8,
    ]);
    settings_frame(0x03d4, 0x0000, CAPTURE_MAC, TAG_DEVICE_SETTINGS, &body)
}

pub fn set_encoding(encoding: u8) -> Vec<u8> {
    let body = [
        0x00, 0x83, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, encoding,
    ];
    settings_frame(0x03d7, 0x0000, CAPTURE_MAC, TAG_DEVICE_SETTINGS, &body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainDirection {
    Input,
    Output,
}

pub fn set_gain_level(channel_number: u16, gain_level: u8, direction: GainDirection) -> Vec<u8> {
    let (sequence_id, selector) = match direction {
        GainDirection::Input => (0x0344, [0x10, 0x01, 0x02]),
        GainDirection::Output => (0x0326, [0x10, 0x02, 0x01]),
    };

    let mut body = vec![
        0x10, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x0c, 0x00,
    ];
    body.extend_from_slice(&selector);
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00]);
    body.push(channel_number as u8);
    body.extend_from_slice(&[0x00, 0x00, 0x00]);
    body.push(gain_level);

    settings_frame(sequence_id, 0x0000, CAPTURE_MAC, TAG_DEVICE_SETTINGS, &body)
}

/// Toggles AES67 interoperability mode. Byte-exact against the captured
/// frames, including the vendor test MAC.
pub fn enable_aes67(enabled: bool) -> Vec<u8> {
    let body = [
        0x10, 0x06, 0x00, 0x00, 0x00, 0x64, 0x00, 0x01, 0x00, u8::from(enabled),
    ];
    settings_frame(0x00ff, 0x22dc, INTEROP_MAC, TAG_INTEROP, &body)
}

// ---------------------------------------------------------------------------
// Volume metering query (device-control framing)
// ---------------------------------------------------------------------------

fn name_lengths(device_name: &str) -> (u8, u8, u8) {
    let name_len = device_name.len() as i32;
    let offset = (name_len & 1) - 2;
    let padding = 10 - (name_len + offset);
    let len1 = name_len * 2 + padding;
    (len1 as u8, (len1 + 2) as u8, (len1 + 6) as u8)
}

fn metering_data_len(device_name: &str) -> u8 {
    match device_name.len() {
        0 | 1 => 54,
        2 | 3 => 56,
        len => (len + (len & 1) + 54) as u8,
    }
}

fn padded_name(device_name: &str) -> Vec<u8> {
    let mut name = device_name.as_bytes().to_vec();
    if device_name.len() % 2 == 0 {
        name.push(0x00);
    }
    name
}

/// Asks the device to stream per-channel volume levels to
/// `local_ip:port`.
pub fn volume_start(device_name: &str, local_ip: Ipv4Addr, mac: [u8; 6], port: u16) -> Vec<u8> {
    let (len1, len2, len3) = name_lengths(device_name);

    let mut buf = BytesMut::new();
    buf.put_slice(&[0x12, 0x00, 0x00, metering_data_len(device_name)]);
    buf.put_slice(&[0xff, 0xff, 0x30, 0x10, 0x00, 0x00, 0x00, 0x00]);
    buf.put_slice(&mac);
    buf.put_slice(&[0x00, 0x00, 0x00, 0x04, 0x00, len1, 0x00, 0x01, 0x00, len2, 0x00, 0x0a]);
    buf.put_slice(&padded_name(device_name));
    buf.put_slice(&[0x16, 0x00, 0x01, 0x00, 0x01, 0x00, len3, 0x00, 0x01]);
    buf.put_u16(port);
    buf.put_u16(0x0001);
    buf.put_u16(0x0000);
    buf.put_slice(&local_ip.octets());
    buf.put_u16(port);
    buf.put_u16(0x0000);
    buf.to_vec()
}

/// Ends a metering stream started with [`volume_start`].
pub fn volume_stop(device_name: &str, mac: [u8; 6], port: u16) -> Vec<u8> {
    let (len1, len2, len3) = name_lengths(device_name);

    let mut buf = BytesMut::new();
    buf.put_slice(&[0x12, 0x00, 0x00, metering_data_len(device_name)]);
    buf.put_slice(&[0xff, 0xff, 0x30, 0x10, 0x00, 0x00, 0x00, 0x00]);
    buf.put_slice(&mac);
    buf.put_slice(&[0x00, 0x00, 0x00, 0x04, 0x00, len1, 0x00, 0x01, 0x00, len2, 0x00, 0x0a]);
    buf.put_slice(&padded_name(device_name));
    buf.put_slice(&[0x01, 0x00, 0x16, 0x00, 0x01, 0x00, len3, 0x00, 0x01]);
    buf.put_u16(port);
    buf.put_u16(0x0001);
    buf.put_u16(0x0000);
    buf.put_slice(&Ipv4Addr::UNSPECIFIED.octets());
    buf.put_u16(0x0000);
    buf.put_u16(0x0000);
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// The command id at bytes 26..28 of a dialect-2 frame.
pub fn message_id(frame: &[u8]) -> Option<u16> {
    if frame.get(..2)? != SETTINGS_MAGIC {
        return None;
    }
    read_u16(frame, 26)
}

/// Sender MAC from bytes 8..14, as lowercase hex.
pub fn sender_mac(frame: &[u8]) -> Option<String> {
    let mac = frame.get(8..14)?;
    Some(mac.iter().map(|b| format!("{b:02x}")).collect())
}

fn nul_string_at(frame: &[u8], offset: usize) -> Result<String> {
    let rest = frame.get(offset..).ok_or_else(|| {
        NetaudioError::InvalidFrame(format!(
            "offset {} outside frame of {} bytes",
            offset,
            frame.len()
        ))
    })?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    String::from_utf8(rest[..end].to_vec())
        .map_err(|_| NetaudioError::InvalidFrame("label is not valid UTF-8".into()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionsStatus {
    /// Vendor model string, e.g. "Dante Application Library".
    pub model: String,
    pub model_id: String,
}

pub fn parse_versions_status(frame: &[u8]) -> Result<VersionsStatus> {
    let model = nul_string_at(frame, 88)?;
    let model_id = nul_string_at(frame, 43)?.replace('\u{3}', "");
    Ok(VersionsStatus { model, model_id })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeModelStatus {
    pub manufacturer: String,
    pub model: String,
}

pub fn parse_make_model_status(frame: &[u8]) -> Result<MakeModelStatus> {
    let manufacturer = nul_string_at(frame, 76)?;
    let model = nul_string_at(frame, 204)?;
    Ok(MakeModelStatus { manufacturer, model })
}

#[derive(Debug, Clone, Default)]
pub struct VolumeLevels {
    pub rx: Vec<u8>,
    pub tx: Vec<u8>,
}

/// The metering frame carries tx then rx volume bytes at its tail,
/// followed by one trailing byte.
pub fn parse_volume_levels(frame: &[u8], rx_count: usize, tx_count: usize) -> Result<VolumeLevels> {
    if frame.len() < rx_count + tx_count + 1 {
        return Err(NetaudioError::InvalidFrame(format!(
            "metering frame of {} bytes cannot carry {} channels",
            frame.len(),
            rx_count + tx_count
        )));
    }

    let end = frame.len() - 1;
    Ok(VolumeLevels {
        rx: frame[end - rx_count..end].to_vec(),
        tx: frame[end - rx_count - tx_count..end - rx_count].to_vec(),
    })
}
