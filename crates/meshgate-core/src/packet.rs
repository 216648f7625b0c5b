//! Canonical packet model shared by every stage of the pipeline
//!
//! Each transport produces its own event shape. The normalizer turns those
//! into a [`Packet`], the classifier wraps it in a [`ClassifiedPacket`], and
//! from there on nothing downstream needs to know which radio produced it
//! beyond the [`NetworkSource`] tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Destination meaning "every node on the channel"
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Alternate broadcast destination used by some firmware builds
pub const BROADCAST_ZERO: u32 = 0;

/// Reserved id for "unknown or local node". Never a broadcast.
pub const UNKNOWN_NODE: u32 = 0xFFFF_FFFE;

/// Returns true for either broadcast sentinel
pub fn is_broadcast_dest(dest_id: u32) -> bool {
    dest_id == BROADCAST_ADDR || dest_id == BROADCAST_ZERO
}

/// Format a node id the way it is written in logs (`!16fad3dc`)
pub fn format_node_id(node_id: u32) -> String {
    format!("!{:08x}", node_id)
}

/// Which transport produced a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSource {
    /// Meshtastic-style radio
    NetworkA,
    /// MeshCore-style companion radio
    NetworkB,
    /// Not attributable to either transport
    Unknown,
}

impl NetworkSource {
    /// Both concrete networks, in startup order
    pub const ALL: [NetworkSource; 2] = [NetworkSource::NetworkA, NetworkSource::NetworkB];

    /// The other concrete network, if any
    pub fn peer(&self) -> Option<NetworkSource> {
        match self {
            NetworkSource::NetworkA => Some(NetworkSource::NetworkB),
            NetworkSource::NetworkB => Some(NetworkSource::NetworkA),
            NetworkSource::Unknown => None,
        }
    }

    /// Short tag used in logs and status output
    pub fn tag(&self) -> &'static str {
        match self {
            NetworkSource::NetworkA => "network_a",
            NetworkSource::NetworkB => "network_b",
            NetworkSource::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Coarse payload classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// UTF-8 text message
    Text,
    /// Device or environment telemetry
    Telemetry,
    /// Position report
    Position,
    /// Node identity / user info
    NodeInfo,
    /// Anything else, including unparseable input
    Other,
}

/// A normalized inbound packet
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    sender_id: u32,
    dest_id: u32,
    network_source: NetworkSource,
    channel: u8,
    payload_kind: PayloadKind,
    text: Option<String>,
    received_at: DateTime<Utc>,
    raw_meta: Map<String, Value>,
}

impl Packet {
    /// Start building a packet for the given source
    pub fn builder(network_source: NetworkSource) -> PacketBuilder {
        PacketBuilder::new(network_source)
    }

    /// Shorthand for a text packet
    pub fn text(
        network_source: NetworkSource,
        sender_id: u32,
        dest_id: u32,
        channel: u8,
        text: impl Into<String>,
    ) -> Self {
        PacketBuilder::new(network_source)
            .sender(sender_id)
            .dest(dest_id)
            .channel(channel)
            .text(text)
            .build()
    }

    /// Originating node
    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    /// Destination node, or a broadcast sentinel
    pub fn dest_id(&self) -> u32 {
        self.dest_id
    }

    /// Transport that produced this packet
    pub fn network_source(&self) -> NetworkSource {
        self.network_source
    }

    /// Logical channel index (0 = primary)
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Payload classification
    pub fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    /// Text body, present only for text payloads
    pub fn text_body(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Wall-clock receive time
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Passthrough metadata (signal quality, hops, ...)
    pub fn raw_meta(&self) -> &Map<String, Value> {
        &self.raw_meta
    }

    /// Convenience lookup into `raw_meta`
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.raw_meta.get(key)
    }
}

/// Builder for [`Packet`]
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    sender_id: u32,
    dest_id: u32,
    network_source: NetworkSource,
    channel: u8,
    payload_kind: PayloadKind,
    text: Option<String>,
    received_at: Option<DateTime<Utc>>,
    raw_meta: Map<String, Value>,
}

impl PacketBuilder {
    fn new(network_source: NetworkSource) -> Self {
        Self {
            sender_id: UNKNOWN_NODE,
            dest_id: BROADCAST_ADDR,
            network_source,
            channel: 0,
            payload_kind: PayloadKind::Other,
            text: None,
            received_at: None,
            raw_meta: Map::new(),
        }
    }

    /// Set the sender id
    pub fn sender(mut self, sender_id: u32) -> Self {
        self.sender_id = sender_id;
        self
    }

    /// Set the destination id
    pub fn dest(mut self, dest_id: u32) -> Self {
        self.dest_id = dest_id;
        self
    }

    /// Set the channel index
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Set the payload kind. Non-text kinds drop any text set earlier.
    pub fn kind(mut self, kind: PayloadKind) -> Self {
        self.payload_kind = kind;
        self
    }

    /// Set a text body (implies [`PayloadKind::Text`])
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.payload_kind = PayloadKind::Text;
        self.text = Some(text.into());
        self
    }

    /// Override the receive timestamp
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Attach one metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_meta.insert(key.into(), value.into());
        self
    }

    /// Finish the packet
    pub fn build(self) -> Packet {
        let text = match self.payload_kind {
            PayloadKind::Text => Some(self.text.unwrap_or_default()),
            _ => None,
        };

        Packet {
            sender_id: self.sender_id,
            dest_id: self.dest_id,
            network_source: self.network_source,
            channel: self.channel,
            payload_kind: self.payload_kind,
            text,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            raw_meta: self.raw_meta,
        }
    }
}

/// A packet plus the routing facts computed once by the classifier
///
/// Downstream stages read these flags; they never recompute them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedPacket {
    /// The underlying packet
    pub packet: Packet,
    /// Addressed to everyone on the channel
    pub is_broadcast: bool,
    /// Sent by our own node on the same network
    pub is_from_self: bool,
    /// Transport flagged this as direct regardless of `dest_id`
    pub is_direct_override: bool,
    /// Human name of the sender, if known
    pub resolved_sender_name: Option<String>,
    /// Text to route on, with any `"Name: "` prefix removed
    pub effective_text: Option<String>,
}

impl ClassifiedPacket {
    /// Text used for command detection
    pub fn command_text(&self) -> Option<&str> {
        self.effective_text
            .as_deref()
            .or_else(|| self.packet.text_body())
    }

    /// Network the packet arrived on
    pub fn source(&self) -> NetworkSource {
        self.packet.network_source()
    }

    /// Direct message addressed by our node to itself
    pub fn is_self_direct(&self) -> bool {
        self.is_from_self && !self.is_broadcast
    }

    /// Best human-readable label for the sender
    pub fn sender_label(&self) -> String {
        match &self.resolved_sender_name {
            Some(name) => name.clone(),
            None => format_node_id(self.packet.sender_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_sentinels() {
        assert!(is_broadcast_dest(BROADCAST_ADDR));
        assert!(is_broadcast_dest(BROADCAST_ZERO));
        assert!(!is_broadcast_dest(UNKNOWN_NODE));
        assert!(!is_broadcast_dest(0x16fa_d3dc));
    }

    #[test]
    fn test_text_packet_shape() {
        let packet = Packet::text(NetworkSource::NetworkB, 0x16fad3dc, BROADCAST_ADDR, 0, "hi");
        assert_eq!(packet.payload_kind(), PayloadKind::Text);
        assert_eq!(packet.text_body(), Some("hi"));
        assert_eq!(packet.network_source(), NetworkSource::NetworkB);
    }

    #[test]
    fn test_non_text_kind_drops_text() {
        let packet = Packet::builder(NetworkSource::NetworkA)
            .text("ignored")
            .kind(PayloadKind::Telemetry)
            .build();
        assert_eq!(packet.payload_kind(), PayloadKind::Telemetry);
        assert!(packet.text_body().is_none());
    }

    #[test]
    fn test_builder_defaults() {
        let packet = Packet::builder(NetworkSource::Unknown).build();
        assert_eq!(packet.sender_id(), UNKNOWN_NODE);
        assert_eq!(packet.dest_id(), BROADCAST_ADDR);
        assert_eq!(packet.payload_kind(), PayloadKind::Other);
        assert!(packet.raw_meta().is_empty());
    }

    #[test]
    fn test_meta_passthrough() {
        let packet = Packet::builder(NetworkSource::NetworkA)
            .meta("rx_snr", 7.5)
            .meta("hop_limit", 3)
            .build();
        assert_eq!(packet.meta("hop_limit"), Some(&Value::from(3)));
        assert!(packet.meta("missing").is_none());
    }

    #[test]
    fn test_source_display_and_peer() {
        assert_eq!(NetworkSource::NetworkA.to_string(), "network_a");
        assert_eq!(NetworkSource::NetworkA.peer(), Some(NetworkSource::NetworkB));
        assert_eq!(NetworkSource::Unknown.peer(), None);
    }

    #[test]
    fn test_node_id_format() {
        assert_eq!(format_node_id(0x16fad3dc), "!16fad3dc");
    }
}
