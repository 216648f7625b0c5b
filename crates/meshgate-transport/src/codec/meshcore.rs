//! Network B companion protocol payloads
//!
//! The first byte of every frame is a response, push or command code.
//! Multi-byte integers are little-endian. Only the codes the bridge needs
//! are decoded; everything else surfaces as [`MeshCoreEvent::Other`].

use bytes::Bytes;

use super::decode_text;
use crate::error::{Result, TransportError};
use crate::event::{MeshCoreEvent, TextType};

/// Command accepted
pub const RESP_OK: u8 = 0x00;
/// Command rejected
pub const RESP_ERR: u8 = 0x01;
/// Radio identity
pub const RESP_SELF_INFO: u8 = 0x05;
/// Direct message
pub const RESP_CONTACT_MSG_RECV: u8 = 0x07;
/// Channel message
pub const RESP_CHANNEL_MSG_RECV: u8 = 0x08;
/// Queue drained
pub const RESP_NO_MORE_MESSAGES: u8 = 0x0A;
/// Direct message with SNR
pub const RESP_CONTACT_MSG_RECV_V3: u8 = 0x10;
/// Channel message with SNR
pub const RESP_CHANNEL_MSG_RECV_V3: u8 = 0x11;
/// Node advert heard
pub const PUSH_ADVERT: u8 = 0x80;
/// Messages queued on the radio
pub const PUSH_MSG_WAITING: u8 = 0x83;

/// Start an app session
pub const CMD_APP_START: u8 = 0x01;
/// Send a direct text
pub const CMD_SEND_TXT_MSG: u8 = 0x02;
/// Send a channel text
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 0x03;
/// Fetch the next queued message
pub const CMD_SYNC_NEXT_MESSAGE: u8 = 0x0A;

/// Protocol version announced in the session start command
pub const APP_PROTOCOL_VERSION: u8 = 3;

const PUBKEY_LEN: usize = 32;
const PREFIX_LEN: usize = 6;
// adv_type, tx_power, max_tx_power
const SELF_INFO_KEY_OFFSET: usize = 3;
// key + lat + lon + policy bytes + freq + bw + sf + cr
const SELF_INFO_NAME_OFFSET: usize = SELF_INFO_KEY_OFFSET + PUBKEY_LEN + 4 + 4 + 4 + 4 + 4 + 1 + 1;

/// Decode one radio-to-host frame payload
pub fn decode_event(frame: &[u8]) -> Result<MeshCoreEvent> {
    let (&code, body) = frame
        .split_first()
        .ok_or_else(|| TransportError::InvalidRecord("empty frame".to_string()))?;

    match code {
        RESP_OK => Ok(MeshCoreEvent::Ok),
        RESP_ERR => Ok(MeshCoreEvent::Error {
            code: body.first().copied().unwrap_or(0),
        }),
        RESP_SELF_INFO => decode_self_info(body),
        RESP_CONTACT_MSG_RECV => decode_contact_message(body, None),
        RESP_CONTACT_MSG_RECV_V3 => {
            let (snr, rest) = split_v3_header(body)?;
            decode_contact_message(rest, Some(snr))
        }
        RESP_CHANNEL_MSG_RECV => decode_channel_message(body, None),
        RESP_CHANNEL_MSG_RECV_V3 => {
            let (snr, rest) = split_v3_header(body)?;
            decode_channel_message(rest, Some(snr))
        }
        RESP_NO_MORE_MESSAGES => Ok(MeshCoreEvent::NoMoreMessages),
        PUSH_ADVERT => decode_advert(body),
        PUSH_MSG_WAITING => Ok(MeshCoreEvent::MessagesWaiting),
        other => Ok(MeshCoreEvent::Other {
            code: other,
            data: Bytes::copy_from_slice(body),
        }),
    }
}

fn truncated(what: &str, len: usize) -> TransportError {
    TransportError::InvalidRecord(format!("{} truncated at {} bytes", what, len))
}

// snr:i8 (quarter dB), reserved:2
fn split_v3_header(body: &[u8]) -> Result<(f32, &[u8])> {
    if body.len() < 3 {
        return Err(truncated("v3 message header", body.len()));
    }
    Ok(((body[0] as i8) as f32 / 4.0, &body[3..]))
}

fn decode_self_info(body: &[u8]) -> Result<MeshCoreEvent> {
    if body.len() < SELF_INFO_KEY_OFFSET + PUBKEY_LEN {
        return Err(truncated("self info", body.len()));
    }
    let mut public_key = [0u8; PUBKEY_LEN];
    public_key.copy_from_slice(&body[SELF_INFO_KEY_OFFSET..SELF_INFO_KEY_OFFSET + PUBKEY_LEN]);
    let name = body
        .get(SELF_INFO_NAME_OFFSET..)
        .map(decode_text)
        .unwrap_or_default();
    Ok(MeshCoreEvent::SelfInfo { public_key, name })
}

// pubkey_prefix:6 path_len:1 txt_type:1 timestamp:4 [signature:4] text
fn decode_contact_message(body: &[u8], snr: Option<f32>) -> Result<MeshCoreEvent> {
    if body.len() < PREFIX_LEN + 6 {
        return Err(truncated("contact message", body.len()));
    }
    let mut pubkey_prefix = [0u8; PREFIX_LEN];
    pubkey_prefix.copy_from_slice(&body[..PREFIX_LEN]);
    let path_len = body[6];
    let text_type = TextType::from(body[7]);
    let sender_timestamp = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);

    let mut text_start = 12;
    if text_type == TextType::SignedPlain {
        text_start += 4;
    }
    let text = body.get(text_start..).map(decode_text).unwrap_or_default();

    Ok(MeshCoreEvent::ContactMessage {
        pubkey_prefix,
        path_len,
        text_type,
        sender_timestamp,
        text,
        snr,
    })
}

// channel_idx:1 path_len:1 txt_type:1 timestamp:4 text
fn decode_channel_message(body: &[u8], snr: Option<f32>) -> Result<MeshCoreEvent> {
    if body.len() < 7 {
        return Err(truncated("channel message", body.len()));
    }
    Ok(MeshCoreEvent::ChannelMessage {
        channel_idx: body[0],
        path_len: body[1],
        text_type: TextType::from(body[2]),
        sender_timestamp: u32::from_le_bytes([body[3], body[4], body[5], body[6]]),
        text: decode_text(&body[7..]),
        snr,
    })
}

// public_key:32 [name]
fn decode_advert(body: &[u8]) -> Result<MeshCoreEvent> {
    if body.len() < PUBKEY_LEN {
        return Err(truncated("advert", body.len()));
    }
    let mut public_key = [0u8; PUBKEY_LEN];
    public_key.copy_from_slice(&body[..PUBKEY_LEN]);
    let name = Some(decode_text(&body[PUBKEY_LEN..])).filter(|n| !n.is_empty());
    Ok(MeshCoreEvent::Advert { public_key, name })
}

/// Session start command
pub fn encode_app_start(app_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + app_name.len());
    out.push(CMD_APP_START);
    out.push(APP_PROTOCOL_VERSION);
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(app_name.as_bytes());
    out
}

/// Fetch-next-message command
pub fn encode_sync_next() -> Vec<u8> {
    vec![CMD_SYNC_NEXT_MESSAGE]
}

/// Channel text command
pub fn encode_channel_text(channel_idx: u8, timestamp: u32, text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + text.len());
    out.push(CMD_SEND_CHANNEL_TXT_MSG);
    out.push(u8::from(TextType::Plain));
    out.push(channel_idx);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(text);
    out
}

/// Direct text command
pub fn encode_contact_text(
    pubkey_prefix: &[u8; 6],
    attempt: u8,
    timestamp: u32,
    text: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + text.len());
    out.push(CMD_SEND_TXT_MSG);
    out.push(u8::from(TextType::Plain));
    out.push(attempt);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(pubkey_prefix);
    out.extend_from_slice(text);
    out
}

/// Self-info response (radio side, used by test radios)
pub fn encode_self_info(public_key: &[u8; 32], name: &str) -> Vec<u8> {
    let mut out = vec![RESP_SELF_INFO, 1, 22, 22];
    out.extend_from_slice(public_key);
    out.resize(1 + SELF_INFO_NAME_OFFSET, 0);
    out.extend_from_slice(name.as_bytes());
    out
}

/// Channel message response (radio side, used by test radios)
pub fn encode_channel_message(channel_idx: u8, timestamp: u32, text: &str) -> Vec<u8> {
    let mut out = vec![RESP_CHANNEL_MSG_RECV, channel_idx, 0xFF, u8::from(TextType::Plain)];
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

/// Contact message response (radio side, used by test radios)
pub fn encode_contact_message(pubkey_prefix: &[u8; 6], timestamp: u32, text: &str) -> Vec<u8> {
    let mut out = vec![RESP_CONTACT_MSG_RECV];
    out.extend_from_slice(pubkey_prefix);
    out.push(0);
    out.push(u8::from(TextType::Plain));
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..4].copy_from_slice(&[0x16, 0xfa, 0xd3, 0xdc]);
        key
    }

    #[test]
    fn test_self_info() {
        let frame = encode_self_info(&key(), "gate-b");
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::SelfInfo { public_key, name } => {
                assert_eq!(public_key, key());
                assert_eq!(name, "gate-b");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_channel_message() {
        let frame = encode_channel_message(0, 1_700_000_000, "Tigro: /echo hi");
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::ChannelMessage {
                channel_idx,
                text,
                sender_timestamp,
                snr,
                ..
            } => {
                assert_eq!(channel_idx, 0);
                assert_eq!(text, "Tigro: /echo hi");
                assert_eq!(sender_timestamp, 1_700_000_000);
                assert!(snr.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_channel_message_v3_snr() {
        let mut frame = vec![RESP_CHANNEL_MSG_RECV_V3, 0xF8, 0, 0];
        frame.extend_from_slice(&encode_channel_message(2, 5, "x")[1..]);
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::ChannelMessage {
                channel_idx, snr, ..
            } => {
                assert_eq!(channel_idx, 2);
                assert_eq!(snr, Some(-2.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_contact_message() {
        let prefix = [1, 2, 3, 4, 5, 6];
        let frame = encode_contact_message(&prefix, 9, "/status");
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::ContactMessage {
                pubkey_prefix,
                text,
                text_type,
                ..
            } => {
                assert_eq!(pubkey_prefix, prefix);
                assert_eq!(text, "/status");
                assert_eq!(text_type, TextType::Plain);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_signed_contact_message_skips_signature() {
        let mut frame = vec![RESP_CONTACT_MSG_RECV, 1, 2, 3, 4, 5, 6, 0, 2];
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        frame.extend_from_slice(b"hello");
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::ContactMessage { text, .. } => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_messages_rejected() {
        assert!(decode_event(&[RESP_CHANNEL_MSG_RECV, 0, 0]).is_err());
        assert!(decode_event(&[RESP_CONTACT_MSG_RECV, 1, 2]).is_err());
        assert!(decode_event(&[RESP_SELF_INFO, 1]).is_err());
        assert!(decode_event(&[]).is_err());
    }

    #[test]
    fn test_push_codes() {
        assert_eq!(
            decode_event(&[PUSH_MSG_WAITING]).unwrap(),
            MeshCoreEvent::MessagesWaiting
        );
        assert_eq!(
            decode_event(&[RESP_NO_MORE_MESSAGES]).unwrap(),
            MeshCoreEvent::NoMoreMessages
        );
        assert!(matches!(
            decode_event(&[0x42, 1, 2]).unwrap(),
            MeshCoreEvent::Other { code: 0x42, .. }
        ));
    }

    #[test]
    fn test_advert_with_name() {
        let mut frame = vec![PUSH_ADVERT];
        frame.extend_from_slice(&key());
        frame.extend_from_slice(b"Tigro");
        match decode_event(&frame).unwrap() {
            MeshCoreEvent::Advert { name, .. } => assert_eq!(name.as_deref(), Some("Tigro")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_command_layouts() {
        let start = encode_app_start("meshgate");
        assert_eq!(start[0], CMD_APP_START);
        assert_eq!(&start[8..], b"meshgate");

        let chan = encode_channel_text(1, 0x01020304, b"pong");
        assert_eq!(&chan[..3], &[CMD_SEND_CHANNEL_TXT_MSG, 0, 1]);
        assert_eq!(&chan[3..7], &[4, 3, 2, 1]);
        assert_eq!(&chan[7..], b"pong");

        let dm = encode_contact_text(&[9; 6], 0, 0, b"hi");
        assert_eq!(dm[0], CMD_SEND_TXT_MSG);
        assert_eq!(&dm[7..13], &[9; 6]);
        assert_eq!(&dm[13..], b"hi");
    }
}
