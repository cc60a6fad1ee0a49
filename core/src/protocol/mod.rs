//! Wire codec for the two framing dialects spoken by the devices.
//!
//! Dialect 1 (`arc`) is the unicast request/response protocol on the
//! audio-routing-control service port. Dialect 2 (`settings`) is the
//! device-settings/device-info framing used for identify, clocking,
//! encoding, gain and the multicast status traffic.

pub mod arc;
pub mod settings;

/// Reads the NUL-terminated UTF-8 string that starts `offset` bytes into
/// `frame`. An offset of zero, an offset past the end of the frame, or a
/// label that is not valid UTF-8 all yield an empty string; truncation is
/// never an error at this layer.
pub fn extract_label(frame: &[u8], offset: u16) -> String {
    if offset == 0 {
        return String::new();
    }

    let start = offset as usize;
    if start >= frame.len() {
        return String::new();
    }

    let rest = &frame[start..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());

    String::from_utf8(rest[..end].to_vec()).unwrap_or_default()
}

pub(crate) fn read_u16(frame: &[u8], at: usize) -> Option<u16> {
    let bytes = frame.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u24(frame: &[u8], at: usize) -> Option<u32> {
    let bytes = frame.get(at..at + 3)?;
    Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
}
