//! Native event records produced by each transport
//!
//! These are the adapter-side shapes, one per radio family, before the
//! engine normalizes them into a canonical packet. [`RawEvent`] is the tagged
//! union the read loops push onto the inbound queue.

use bytes::Bytes;
use meshgate_core::NetworkSource;

/// Port numbers for Network A data payloads
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshtasticPort {
    /// Unknown/invalid port
    Unknown = 0,
    /// Text message port (UTF-8 encoded strings)
    TextMessage = 1,
    /// Remote hardware control
    RemoteHardware = 2,
    /// Position data
    Position = 3,
    /// Node info (user data)
    NodeInfo = 4,
    /// Routing protocol messages
    Routing = 5,
    /// Admin messages
    Admin = 6,
    /// Telemetry data
    Telemetry = 67,
    /// Private application ports start here
    PrivateApp = 256,
}

impl From<u32> for MeshtasticPort {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::TextMessage,
            2 => Self::RemoteHardware,
            3 => Self::Position,
            4 => Self::NodeInfo,
            5 => Self::Routing,
            6 => Self::Admin,
            67 => Self::Telemetry,
            256 => Self::PrivateApp,
            _ => Self::Unknown,
        }
    }
}

impl From<MeshtasticPort> for u32 {
    fn from(port: MeshtasticPort) -> Self {
        port as u32
    }
}

/// A decoded Network A mesh packet
#[derive(Debug, Clone, PartialEq)]
pub struct MeshtasticRecord {
    /// Source node ID
    pub from: u32,
    /// Destination node ID (0xFFFFFFFF for broadcast)
    pub to: u32,
    /// Unique packet identifier
    pub packet_id: u32,
    /// Channel index (0-7)
    pub channel: u8,
    /// Port number as sent on the wire
    pub port_num: u32,
    /// Raw payload data
    pub payload: Bytes,
    /// Remaining hops
    pub hop_limit: u8,
    /// Sender requested an acknowledgement
    pub want_ack: bool,
    /// Radio marked this as a direct message even if `to` is unresolved
    pub direct: bool,
    /// Receive SNR in dB, when reported
    pub rx_snr: Option<f32>,
    /// Receive RSSI in dBm, when reported
    pub rx_rssi: Option<i16>,
}

impl MeshtasticRecord {
    /// Typed view of the port number
    pub fn port(&self) -> MeshtasticPort {
        MeshtasticPort::from(self.port_num)
    }
}

/// Text encoding flag on Network B messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextType {
    /// Plain text
    Plain,
    /// Remote CLI data
    CliData,
    /// Plain text with sender signature prefix
    SignedPlain,
    /// Unrecognised flag value
    Other(u8),
}

impl From<u8> for TextType {
    fn from(value: u8) -> Self {
        match value {
            0 => TextType::Plain,
            1 => TextType::CliData,
            2 => TextType::SignedPlain,
            other => TextType::Other(other),
        }
    }
}

impl From<TextType> for u8 {
    fn from(value: TextType) -> Self {
        match value {
            TextType::Plain => 0,
            TextType::CliData => 1,
            TextType::SignedPlain => 2,
            TextType::Other(v) => v,
        }
    }
}

/// A decoded Network B companion-radio event
#[derive(Debug, Clone, PartialEq)]
pub enum MeshCoreEvent {
    /// Radio identity, answered to the session start command
    SelfInfo {
        /// Radio public key
        public_key: [u8; 32],
        /// Advertised node name
        name: String,
    },
    /// Direct message from a contact
    ContactMessage {
        /// First six bytes of the sender's public key
        pubkey_prefix: [u8; 6],
        /// Hops travelled (0xFF = direct/flood unknown)
        path_len: u8,
        /// Text encoding flag
        text_type: TextType,
        /// Sender clock, seconds since epoch
        sender_timestamp: u32,
        /// Message body
        text: String,
        /// Receive SNR, when reported
        snr: Option<f32>,
    },
    /// Public channel message (body is `"Name: text"`)
    ChannelMessage {
        /// Channel index
        channel_idx: u8,
        /// Hops travelled
        path_len: u8,
        /// Text encoding flag
        text_type: TextType,
        /// Sender clock, seconds since epoch
        sender_timestamp: u32,
        /// Message body
        text: String,
        /// Receive SNR, when reported
        snr: Option<f32>,
    },
    /// Another node advertised itself
    Advert {
        /// Advertised public key
        public_key: [u8; 32],
        /// Advertised name, when included
        name: Option<String>,
    },
    /// Radio has queued messages to fetch
    MessagesWaiting,
    /// Message queue drained
    NoMoreMessages,
    /// Command accepted
    Ok,
    /// Command rejected
    Error {
        /// Radio error code
        code: u8,
    },
    /// Any other response or push code
    Other {
        /// Response code
        code: u8,
        /// Remaining bytes
        data: Bytes,
    },
}

/// Node id used for a Network B public key (first four bytes, big-endian)
pub fn meshcore_node_id(key_prefix: &[u8]) -> u32 {
    let mut id = [0u8; 4];
    for (slot, byte) in id.iter_mut().zip(key_prefix.iter()) {
        *slot = *byte;
    }
    u32::from_be_bytes(id)
}

/// Event delivered by an adapter read loop
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Network A packet
    NetworkA(MeshtasticRecord),
    /// Network B event
    NetworkB(MeshCoreEvent),
    /// A frame arrived but its contents could not be decoded
    Garbled {
        /// Frame payload as received
        bytes: Bytes,
        /// Decode failure reason
        reason: String,
    },
}

impl RawEvent {
    /// Network implied by the event shape, if any
    pub fn native_source(&self) -> Option<NetworkSource> {
        match self {
            RawEvent::NetworkA(_) => Some(NetworkSource::NetworkA),
            RawEvent::NetworkB(_) => Some(NetworkSource::NetworkB),
            RawEvent::Garbled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_conversion() {
        assert_eq!(MeshtasticPort::from(1), MeshtasticPort::TextMessage);
        assert_eq!(MeshtasticPort::from(67), MeshtasticPort::Telemetry);
        assert_eq!(MeshtasticPort::from(999), MeshtasticPort::Unknown);
        assert_eq!(u32::from(MeshtasticPort::NodeInfo), 4);
    }

    #[test]
    fn test_text_type_round_trip_values() {
        assert_eq!(TextType::from(2), TextType::SignedPlain);
        assert_eq!(u8::from(TextType::Other(9)), 9);
    }

    #[test]
    fn test_meshcore_node_id() {
        let key = [0x16, 0xfa, 0xd3, 0xdc, 0x01, 0x02];
        assert_eq!(meshcore_node_id(&key), 0x16fad3dc);
        assert_eq!(meshcore_node_id(&[0xAB]), 0xAB00_0000);
    }

    #[test]
    fn test_native_source() {
        let garbled = RawEvent::Garbled {
            bytes: Bytes::from_static(b"\x00"),
            reason: "short".into(),
        };
        assert_eq!(garbled.native_source(), None);
        assert_eq!(
            RawEvent::NetworkB(MeshCoreEvent::MessagesWaiting).native_source(),
            Some(NetworkSource::NetworkB)
        );
    }
}
