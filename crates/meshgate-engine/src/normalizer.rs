//! Packet normalizer
//!
//! Converts each transport's native event shape into the canonical
//! [`Packet`]. Normalization never fails: anything that cannot be
//! interpreted becomes a [`PayloadKind::Other`] packet with whatever could be
//! read carried in `raw_meta`.
//!
//! Besides the packet, the normalizer reports a [`DeliveryHint`] telling the
//! classifier whether the transport itself marked the packet as direct, or
//! whether addressing could not be determined at all.

use chrono::{DateTime, Utc};
use meshgate_core::{
    format_node_id, NetworkSource, Packet, PacketBuilder, PayloadKind, BROADCAST_ADDR,
    UNKNOWN_NODE,
};
use meshgate_transport::{
    meshcore_node_id, MeshCoreEvent, MeshtasticPort, MeshtasticRecord, RawEvent, TextType,
};

/// Metadata key holding a node's advertised display name
pub const META_NODE_NAME: &str = "node_name";

/// An event as delivered by an adapter read loop
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Adapter that produced the event
    pub source: NetworkSource,
    /// The adapter's own node id at the time of the read
    pub local_node_id: Option<u32>,
    /// Native event
    pub event: RawEvent,
    /// Receive time
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Wrap an event read just now
    pub fn new(source: NetworkSource, local_node_id: Option<u32>, event: RawEvent) -> Self {
        Self {
            source,
            local_node_id,
            event,
            received_at: Utc::now(),
        }
    }

    /// Whether the adapter could not decode this event
    pub fn is_garbled(&self) -> bool {
        matches!(self.event, RawEvent::Garbled { .. })
    }
}

/// How the transport addressed a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryHint {
    /// Broadcast vs direct follows from `dest_id`
    FromDestination,
    /// Transport says direct, whatever `dest_id` holds
    Direct,
    /// Addressing could not be determined
    Ambiguous,
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPacket {
    /// Canonical packet
    pub packet: Packet,
    /// Addressing signal from the transport
    pub hint: DeliveryHint,
}

/// Convert a native event into a canonical packet
pub fn normalize(inbound: &InboundEvent) -> NormalizedPacket {
    let base = Packet::builder(inbound.source).received_at(inbound.received_at);

    match (&inbound.event, inbound.event.native_source()) {
        (RawEvent::Garbled { bytes, reason }, _) => NormalizedPacket {
            packet: base
                .dest(UNKNOWN_NODE)
                .kind(PayloadKind::Other)
                .meta("garbled", reason.as_str())
                .meta("length", bytes.len())
                .build(),
            hint: DeliveryHint::Ambiguous,
        },
        (event, Some(native)) if native != inbound.source => NormalizedPacket {
            packet: Packet::builder(NetworkSource::Unknown)
                .received_at(inbound.received_at)
                .dest(UNKNOWN_NODE)
                .kind(PayloadKind::Other)
                .meta("adapter_source", inbound.source.tag())
                .meta("native_source", native.tag())
                .meta("event", event_name(event))
                .build(),
            hint: DeliveryHint::Ambiguous,
        },
        (RawEvent::NetworkA(record), _) => normalize_record(base, record),
        (RawEvent::NetworkB(event), _) => normalize_meshcore(base, event, inbound.local_node_id),
    }
}

fn event_name(event: &RawEvent) -> &'static str {
    match event {
        RawEvent::NetworkA(_) => "mesh_packet",
        RawEvent::NetworkB(MeshCoreEvent::ChannelMessage { .. }) => "channel_message",
        RawEvent::NetworkB(MeshCoreEvent::ContactMessage { .. }) => "contact_message",
        RawEvent::NetworkB(MeshCoreEvent::Advert { .. }) => "advert",
        RawEvent::NetworkB(_) => "control",
        RawEvent::Garbled { .. } => "garbled",
    }
}

fn decode_payload_text(payload: &[u8]) -> (String, bool) {
    let lossy = std::str::from_utf8(payload).is_err();
    let text = String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .to_string();
    (text, lossy)
}

fn normalize_record(base: PacketBuilder, record: &MeshtasticRecord) -> NormalizedPacket {
    let mut builder = base
        .sender(record.from)
        .dest(record.to)
        .channel(record.channel)
        .meta("packet_id", record.packet_id)
        .meta("hop_limit", record.hop_limit)
        .meta("port", record.port_num);

    if let Some(snr) = record.rx_snr {
        builder = builder.meta("rx_snr", snr);
    }
    if let Some(rssi) = record.rx_rssi {
        builder = builder.meta("rx_rssi", rssi);
    }
    if record.want_ack {
        builder = builder.meta("want_ack", true);
    }

    builder = match record.port() {
        MeshtasticPort::TextMessage => {
            let (text, lossy) = decode_payload_text(&record.payload);
            if lossy {
                builder = builder.meta("lossy_utf8", true);
            }
            builder.text(text)
        }
        MeshtasticPort::Position => builder.kind(PayloadKind::Position),
        MeshtasticPort::Telemetry => builder.kind(PayloadKind::Telemetry),
        MeshtasticPort::NodeInfo => {
            let (name, _) = decode_payload_text(&record.payload);
            let name = name.trim();
            let builder = builder.kind(PayloadKind::NodeInfo);
            if name.is_empty() {
                builder
            } else {
                builder.meta(META_NODE_NAME, name)
            }
        }
        _ => builder
            .kind(PayloadKind::Other)
            .meta("payload_len", record.payload.len()),
    };

    NormalizedPacket {
        packet: builder.build(),
        hint: if record.direct {
            DeliveryHint::Direct
        } else {
            DeliveryHint::FromDestination
        },
    }
}

fn text_kind_builder(builder: PacketBuilder, text_type: TextType, text: &str) -> PacketBuilder {
    match text_type {
        TextType::Plain | TextType::SignedPlain => builder.text(text),
        other => builder
            .kind(PayloadKind::Other)
            .meta("text_type", u8::from(other)),
    }
}

fn normalize_meshcore(
    base: PacketBuilder,
    event: &MeshCoreEvent,
    local_node_id: Option<u32>,
) -> NormalizedPacket {
    match event {
        // Public channel traffic reaches us through our own radio, which is
        // the only sender identity the protocol gives us.
        MeshCoreEvent::ChannelMessage {
            channel_idx,
            path_len,
            text_type,
            sender_timestamp,
            text,
            snr,
        } => {
            let mut builder = base
                .sender(local_node_id.unwrap_or(UNKNOWN_NODE))
                .dest(BROADCAST_ADDR)
                .channel(*channel_idx)
                .meta("path_len", *path_len)
                .meta("sender_timestamp", *sender_timestamp);
            if let Some(snr) = snr {
                builder = builder.meta("rx_snr", *snr);
            }
            NormalizedPacket {
                packet: text_kind_builder(builder, *text_type, text).build(),
                hint: DeliveryHint::FromDestination,
            }
        }
        MeshCoreEvent::ContactMessage {
            pubkey_prefix,
            path_len,
            text_type,
            sender_timestamp,
            text,
            snr,
        } => {
            let sender = meshcore_node_id(pubkey_prefix);
            let mut builder = base
                .sender(sender)
                .dest(local_node_id.unwrap_or(UNKNOWN_NODE))
                .meta("pubkey_prefix", hex_prefix(pubkey_prefix))
                .meta("path_len", *path_len)
                .meta("sender_timestamp", *sender_timestamp);
            if let Some(snr) = snr {
                builder = builder.meta("rx_snr", *snr);
            }
            NormalizedPacket {
                packet: text_kind_builder(builder, *text_type, text).build(),
                hint: DeliveryHint::Direct,
            }
        }
        MeshCoreEvent::Advert { public_key, name } => {
            let mut builder = base
                .sender(meshcore_node_id(public_key))
                .dest(BROADCAST_ADDR)
                .kind(PayloadKind::NodeInfo)
                .meta("pubkey_prefix", hex_prefix(&public_key[..6]));
            if let Some(name) = name {
                builder = builder.meta(META_NODE_NAME, name.as_str());
            }
            NormalizedPacket {
                packet: builder.build(),
                hint: DeliveryHint::FromDestination,
            }
        }
        other => NormalizedPacket {
            packet: base
                .dest(UNKNOWN_NODE)
                .kind(PayloadKind::Other)
                .meta("event", control_name(other))
                .build(),
            hint: DeliveryHint::Ambiguous,
        },
    }
}

fn control_name(event: &MeshCoreEvent) -> String {
    match event {
        MeshCoreEvent::SelfInfo { .. } => "self_info".to_string(),
        MeshCoreEvent::MessagesWaiting => "messages_waiting".to_string(),
        MeshCoreEvent::NoMoreMessages => "no_more_messages".to_string(),
        MeshCoreEvent::Ok => "ok".to_string(),
        MeshCoreEvent::Error { code } => format!("error:{}", code),
        MeshCoreEvent::Other { code, .. } => format!("code:0x{:02x}", code),
        MeshCoreEvent::ChannelMessage { .. }
        | MeshCoreEvent::ContactMessage { .. }
        | MeshCoreEvent::Advert { .. } => "message".to_string(),
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Short description of a packet for logs
pub fn describe(packet: &Packet) -> String {
    format!(
        "{} {} -> {} ch{} {:?}",
        packet.network_source(),
        format_node_id(packet.sender_id()),
        format_node_id(packet.dest_id()),
        packet.channel(),
        packet.payload_kind()
    )
}
