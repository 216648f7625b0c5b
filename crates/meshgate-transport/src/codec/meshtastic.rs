//! Network A frame payloads
//!
//! Every frame payload starts with a one-byte kind:
//!
//! | kind | direction | body |
//! |---|---|---|
//! | `0x01` | both | mesh packet record |
//! | `0x02` | radio → host | `my_node_num: u32be` |
//! | `0x03` | radio → host | `config_complete_id: u32be` |
//! | `0x04` | host → radio | `want_config_id: u32be` |
//!
//! Mesh packet record:
//!
//! ```text
//! from:u32be to:u32be id:u32be port:u8 hop_limit:u8 channel:u8 flags:u8
//! [snr_q4:i8 rssi:i16be]   (when flags & 0x04)
//! payload...
//! ```
//!
//! Flag bits: `0x01` want-ack, `0x02` direct (destination unresolved),
//! `0x04` signal report present.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::event::MeshtasticRecord;

/// Mesh packet record
pub const KIND_PACKET: u8 = 0x01;
/// Radio identity report
pub const KIND_MY_INFO: u8 = 0x02;
/// End of the configuration dump
pub const KIND_CONFIG_COMPLETE: u8 = 0x03;
/// Host asks for the configuration dump
pub const KIND_WANT_CONFIG: u8 = 0x04;

/// Fixed part of a packet record
pub const RECORD_HEADER_LEN: usize = 16;

const FLAG_WANT_ACK: u8 = 0x01;
const FLAG_DIRECT: u8 = 0x02;
const FLAG_SIGNAL: u8 = 0x04;

/// One decoded radio-to-host frame
#[derive(Debug, Clone, PartialEq)]
pub enum FromRadio {
    /// Mesh traffic
    Packet(MeshtasticRecord),
    /// Radio's own node number
    MyInfo {
        /// Our node id on Network A
        node_num: u32,
    },
    /// Configuration dump finished
    ConfigComplete {
        /// Echo of the want-config id
        id: u32,
    },
    /// Frame kind this bridge does not use
    Other {
        /// Frame kind byte
        kind: u8,
    },
}

/// Decode a radio-to-host frame payload
pub fn decode_from_radio(frame: &[u8]) -> Result<FromRadio> {
    let (&kind, body) = frame
        .split_first()
        .ok_or_else(|| TransportError::InvalidRecord("empty frame".to_string()))?;

    match kind {
        KIND_PACKET => decode_record(body).map(FromRadio::Packet),
        KIND_MY_INFO => Ok(FromRadio::MyInfo {
            node_num: read_u32(body, "my_info")?,
        }),
        KIND_CONFIG_COMPLETE => Ok(FromRadio::ConfigComplete {
            id: read_u32(body, "config_complete")?,
        }),
        other => Ok(FromRadio::Other { kind: other }),
    }
}

fn read_u32(body: &[u8], what: &str) -> Result<u32> {
    if body.len() < 4 {
        return Err(TransportError::InvalidRecord(format!(
            "{} frame too short: {} bytes",
            what,
            body.len()
        )));
    }
    Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
}

/// Decode the body of a packet frame
pub fn decode_record(body: &[u8]) -> Result<MeshtasticRecord> {
    if body.len() < RECORD_HEADER_LEN {
        return Err(TransportError::InvalidRecord(format!(
            "packet record too short: {} bytes",
            body.len()
        )));
    }

    let mut buf = body;
    let from = buf.get_u32();
    let to = buf.get_u32();
    let packet_id = buf.get_u32();
    let port_num = buf.get_u8() as u32;
    let hop_limit = buf.get_u8();
    let channel = buf.get_u8();
    let flags = buf.get_u8();

    let (rx_snr, rx_rssi) = if flags & FLAG_SIGNAL != 0 {
        if buf.remaining() < 3 {
            return Err(TransportError::InvalidRecord(
                "signal report truncated".to_string(),
            ));
        }
        let snr = buf.get_i8() as f32 / 4.0;
        let rssi = buf.get_i16();
        (Some(snr), Some(rssi))
    } else {
        (None, None)
    };

    Ok(MeshtasticRecord {
        from,
        to,
        packet_id,
        channel,
        port_num,
        payload: Bytes::copy_from_slice(buf),
        hop_limit,
        want_ack: flags & FLAG_WANT_ACK != 0,
        direct: flags & FLAG_DIRECT != 0,
        rx_snr,
        rx_rssi,
    })
}

/// Encode a packet record as a frame payload
pub fn encode_packet(record: &MeshtasticRecord) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(1 + RECORD_HEADER_LEN + 3 + record.payload.len());
    out.put_u8(KIND_PACKET);
    out.put_u32(record.from);
    out.put_u32(record.to);
    out.put_u32(record.packet_id);
    out.put_u8(record.port_num.min(u8::MAX as u32) as u8);
    out.put_u8(record.hop_limit);
    out.put_u8(record.channel);

    let mut flags = 0u8;
    if record.want_ack {
        flags |= FLAG_WANT_ACK;
    }
    if record.direct {
        flags |= FLAG_DIRECT;
    }
    let signal = record.rx_snr.is_some() || record.rx_rssi.is_some();
    if signal {
        flags |= FLAG_SIGNAL;
    }
    out.put_u8(flags);

    if signal {
        let snr_q4 = (record.rx_snr.unwrap_or(0.0) * 4.0).round().clamp(-128.0, 127.0) as i8;
        out.put_i8(snr_q4);
        out.put_i16(record.rx_rssi.unwrap_or(0));
    }

    out.put_slice(&record.payload);
    out.to_vec()
}

/// Encode a want-config request
pub fn encode_want_config(id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(KIND_WANT_CONFIG);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Encode a my-info report (radio side, used by test radios)
pub fn encode_my_info(node_num: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(KIND_MY_INFO);
    out.extend_from_slice(&node_num.to_be_bytes());
    out
}

/// Encode a config-complete marker (radio side, used by test radios)
pub fn encode_config_complete(id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(KIND_CONFIG_COMPLETE);
    out.extend_from_slice(&id.to_be_bytes());
    out
}
