//! Record codecs for the two radio families
//!
//! Framing is handled by [`crate::framing`]; these modules only look inside
//! a complete frame payload.

pub mod meshcore;
pub mod meshtastic;

/// Decode UTF-8 text from a radio, replacing invalid sequences and trailing NULs
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
