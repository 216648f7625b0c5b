//! Stream framing for both radio links
//!
//! Serial and TCP links deliver a byte stream; each radio wraps its payloads
//! in a small header so frames can be recovered from that stream:
//!
//! | format | inbound header | outbound header | length |
//! |---|---|---|---|
//! | Network A | `0x94 0xC3` | `0x94 0xC3` | u16 big-endian |
//! | Network B | `>` | `<` | u16 little-endian |
//!
//! Radios also print debug text on the same stream, so the decoder skips
//! anything before a valid start marker.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};

/// Network A frame start marker
pub const MESHTASTIC_MAGIC: u16 = 0x94C3;

/// Network B radio-to-host frame marker
pub const MESHCORE_INBOUND_MARKER: u8 = b'>';

/// Network B host-to-radio frame marker
pub const MESHCORE_OUTBOUND_MARKER: u8 = b'<';

/// Largest Network A frame payload accepted
pub const MESHTASTIC_MAX_FRAME: usize = 512;

/// Largest Network B frame payload accepted
pub const MESHCORE_MAX_FRAME: usize = 300;

/// Framing convention of a radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// `0x94C3` + u16 BE length, same in both directions
    Meshtastic,
    /// `>`/`<` + u16 LE length
    MeshCore,
}

impl FrameFormat {
    fn inbound_marker(&self) -> &'static [u8] {
        match self {
            FrameFormat::Meshtastic => &[0x94, 0xC3],
            FrameFormat::MeshCore => &[MESHCORE_INBOUND_MARKER],
        }
    }

    fn outbound_marker(&self) -> &'static [u8] {
        match self {
            FrameFormat::Meshtastic => &[0x94, 0xC3],
            FrameFormat::MeshCore => &[MESHCORE_OUTBOUND_MARKER],
        }
    }

    fn header_len(&self) -> usize {
        self.inbound_marker().len() + 2
    }

    /// Largest payload this format accepts
    pub fn max_payload(&self) -> usize {
        match self {
            FrameFormat::Meshtastic => MESHTASTIC_MAX_FRAME,
            FrameFormat::MeshCore => MESHCORE_MAX_FRAME,
        }
    }

    fn read_length(&self, bytes: [u8; 2]) -> usize {
        match self {
            FrameFormat::Meshtastic => u16::from_be_bytes(bytes) as usize,
            FrameFormat::MeshCore => u16::from_le_bytes(bytes) as usize,
        }
    }

    /// Frame a payload for sending to the radio
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.max_payload() {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: self.max_payload(),
            });
        }

        let length = payload.len() as u16;
        let marker = self.outbound_marker();
        let mut frame = Vec::with_capacity(marker.len() + 2 + payload.len());
        frame.extend_from_slice(marker);
        match self {
            FrameFormat::Meshtastic => frame.extend_from_slice(&length.to_be_bytes()),
            FrameFormat::MeshCore => frame.extend_from_slice(&length.to_le_bytes()),
        }
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

/// Incremental decoder that pulls complete frames out of a byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    format: FrameFormat,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder for the given format
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buffer: BytesMut::with_capacity(format.max_payload() * 2),
        }
    }

    /// Append bytes read from the link
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame (used after reconnect)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to take one complete frame payload from the buffer
    ///
    /// Returns `Ok(None)` when more bytes are needed. An oversized length
    /// field returns `InvalidFrame` after skipping the bad marker, so the
    /// next call resynchronises on the following frame.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let header_len = self.format.header_len();
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let marker = self.format.inbound_marker();
        if !self.buffer.starts_with(marker) {
            // Not a valid frame start - scan for marker
            if let Some(pos) = self.find_marker() {
                warn!(discarded = pos, "Discarding bytes before frame marker");
                self.buffer.advance(pos);
            } else {
                // Keep a trailing byte that could be the start of a split marker
                let keep = if marker.len() > 1 && self.buffer.last() == Some(&marker[0]) {
                    1
                } else {
                    0
                };
                let discard = self.buffer.len() - keep;
                if discard > 0 {
                    warn!(discarded = discard, "Discarding buffer without frame marker");
                    self.buffer.advance(discard);
                }
                return Ok(None);
            }

            // Re-check buffer size after advancing
            if self.buffer.len() < header_len {
                return Ok(None);
            }
        }

        let len_at = marker.len();
        let length = self
            .format
            .read_length([self.buffer[len_at], self.buffer[len_at + 1]]);

        if length > self.format.max_payload() {
            warn!(length, "Frame length too large, likely corrupt");
            self.buffer.advance(marker.len());
            return Err(TransportError::InvalidFrame(format!(
                "frame length {} exceeds maximum {}",
                length,
                self.format.max_payload()
            )));
        }

        let total_size = header_len + length;
        if self.buffer.len() < total_size {
            trace!(
                have = self.buffer.len(),
                need = total_size,
                "Waiting for complete frame"
            );
            return Ok(None);
        }

        let frame = self.buffer.split_to(total_size);
        let payload = Bytes::copy_from_slice(&frame[header_len..]);

        debug!(size = payload.len(), "Received complete frame");
        Ok(Some(payload))
    }

    fn find_marker(&self) -> Option<usize> {
        let marker = self.format.inbound_marker();
        self.buffer
            .windows(marker.len())
            .position(|window| window == marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_meshtastic() {
        let framed = FrameFormat::Meshtastic.encode(b"hello").unwrap();
        assert_eq!(&framed[..2], &[0x94, 0xC3]);
        assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 5);
        assert_eq!(&framed[4..], b"hello");
    }

    #[test]
    fn test_encode_meshcore_uses_outbound_marker() {
        let framed = FrameFormat::MeshCore.encode(&[0x0A]).unwrap();
        assert_eq!(framed, vec![b'<', 0x01, 0x00, 0x0A]);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let payload = vec![0u8; MESHCORE_MAX_FRAME + 1];
        let err = FrameFormat::MeshCore.encode(&payload).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_parse_complete_frame() {
        let mut decoder = FrameDecoder::new(FrameFormat::Meshtastic);
        decoder.extend(&FrameFormat::Meshtastic.encode(b"test").unwrap());

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.unwrap().as_ref(), b"test");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_parse_partial_frame() {
        let mut decoder = FrameDecoder::new(FrameFormat::Meshtastic);
        decoder.extend(&[0x94, 0xC3, 0x00, 0x05, b'a']);

        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 5);

        decoder.extend(b"bcde");
        assert_eq!(decoder.next_frame().unwrap().unwrap().as_ref(), b"abcde");
    }

    #[test]
    fn test_skip_garbage_before_magic() {
        let mut decoder = FrameDecoder::new(FrameFormat::Meshtastic);
        decoder.extend(b"INFO | boot ok\r\n");
        decoder.extend(&[0x94, 0xC3, 0x00, 0x04]);
        decoder.extend(b"test");

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.unwrap().as_ref(), b"test");
    }

    #[test]
    fn test_keeps_split_magic_byte() {
        let mut decoder = FrameDecoder::new(FrameFormat::Meshtastic);
        decoder.extend(&[b'x', b'y', b'z', 0x94]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 1);

        decoder.extend(&[0xC3, 0x00, 0x01, b'!']);
        assert_eq!(decoder.next_frame().unwrap().unwrap().as_ref(), b"!");
    }

    #[test]
    fn test_meshcore_inbound_little_endian() {
        let mut decoder = FrameDecoder::new(FrameFormat::MeshCore);
        decoder.extend(&[b'>', 0x02, 0x00, 0x83, 0x00]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().as_ref(), &[0x83, 0x00]);
    }

    #[test]
    fn test_oversized_length_resyncs() {
        let mut decoder = FrameDecoder::new(FrameFormat::Meshtastic);
        decoder.extend(&[0x94, 0xC3, 0xFF, 0xFF]);
        decoder.extend(&FrameFormat::Meshtastic.encode(b"ok").unwrap());

        assert!(matches!(
            decoder.next_frame(),
            Err(TransportError::InvalidFrame(_))
        ));
        assert_eq!(decoder.next_frame().unwrap().unwrap().as_ref(), b"ok");
    }
}
