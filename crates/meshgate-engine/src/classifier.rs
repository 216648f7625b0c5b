//! Source and classification engine
//!
//! Computes, once per packet, the routing facts every later stage relies on:
//! broadcast vs direct, whether our own node sent it, and the human sender
//! name. Later stages read the flags on [`ClassifiedPacket`] and never
//! recompute them.
//!
//! Classification rules:
//!
//! 1. A transport direct-override forces `is_broadcast = false`. Packets whose
//!    addressing is ambiguous are also treated as not broadcast, so they can
//!    never trigger a broadcast-only execution path.
//! 2. `is_from_self` compares the sender with our id on the same network.
//! 3. Broadcast text of the form `"<name>: <prefix>..."` yields the sender
//!    name and the stripped command text, whatever the sender id is.

use meshgate_core::{is_broadcast_dest, ClassifiedPacket, PayloadKind};
use tracing::{debug, trace};

use crate::directory::{NodeDirectory, OwnNodeIds};
use crate::normalizer::{DeliveryHint, NormalizedPacket};

/// Longest name accepted in a `"Name: "` prefix
const MAX_PREFIX_NAME_LEN: usize = 32;

/// Classifies normalized packets
#[derive(Debug, Clone)]
pub struct Classifier {
    command_prefix: char,
}

impl Classifier {
    /// Create a classifier for the given command prefix
    pub fn new(command_prefix: char) -> Self {
        Self { command_prefix }
    }

    /// Command prefix in use
    pub fn command_prefix(&self) -> char {
        self.command_prefix
    }

    /// Classify one packet
    pub fn classify(
        &self,
        normalized: NormalizedPacket,
        own_ids: &OwnNodeIds,
        directory: &NodeDirectory,
    ) -> ClassifiedPacket {
        let NormalizedPacket { packet, hint } = normalized;
        let source = packet.network_source();

        let is_direct_override = hint == DeliveryHint::Direct;
        let is_broadcast = match hint {
            DeliveryHint::FromDestination => is_broadcast_dest(packet.dest_id()),
            DeliveryHint::Direct => false,
            DeliveryHint::Ambiguous => {
                debug!(source = %source, "Ambiguous addressing, treating as direct");
                false
            }
        };
        let is_from_self = own_ids.is_own(source, packet.sender_id());

        let mut resolved_sender_name = None;
        let mut effective_text = None;

        if is_broadcast && packet.payload_kind() == PayloadKind::Text {
            if let Some((name, rest)) = packet
                .text_body()
                .and_then(|text| split_sender_prefix(text, self.command_prefix))
            {
                trace!(name, "Stripped sender prefix");
                resolved_sender_name = Some(name.to_string());
                effective_text = Some(rest.to_string());
            }
        }

        if resolved_sender_name.is_none() {
            resolved_sender_name = directory.lookup(source, packet.sender_id());
        }

        ClassifiedPacket {
            packet,
            is_broadcast,
            is_from_self,
            is_direct_override,
            resolved_sender_name,
            effective_text,
        }
    }
}

/// Split `"<name>: <rest>"` when `rest` starts with the command prefix
///
/// Returns the trimmed name and `rest`, or `None` when the text does not
/// follow the convention.
pub fn split_sender_prefix(text: &str, command_prefix: char) -> Option<(&str, &str)> {
    let (name, rest) = text.split_once(": ")?;
    let name = name.trim();
    let rest = rest.trim_start();

    if name.is_empty()
        || name.chars().count() > MAX_PREFIX_NAME_LEN
        || name.starts_with(command_prefix)
        || name.contains('\n')
    {
        return None;
    }
    if !rest.starts_with(command_prefix) {
        return None;
    }
    Some((name, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_core::{
        NetworkSource, Packet, BROADCAST_ADDR, BROADCAST_ZERO, UNKNOWN_NODE,
    };

    const OWN_B: u32 = 0x16fa_d3dc;

    fn fixture() -> (Classifier, OwnNodeIds, NodeDirectory) {
        let ids = OwnNodeIds::new();
        ids.learn(NetworkSource::NetworkB, Some(OWN_B));
        ids.learn(NetworkSource::NetworkA, Some(0xA0A0_A0A0));
        (Classifier::new('/'), ids, NodeDirectory::new())
    }

    fn normalized(packet: Packet, hint: DeliveryHint) -> NormalizedPacket {
        NormalizedPacket { packet, hint }
    }

    #[test]
    fn test_broadcast_sentinels_without_override() {
        let (classifier, ids, dir) = fixture();
        for dest in [BROADCAST_ADDR, BROADCAST_ZERO] {
            let packet = Packet::text(NetworkSource::NetworkA, 0x1234, dest, 0, "hello");
            let cp = classifier.classify(
                normalized(packet, DeliveryHint::FromDestination),
                &ids,
                &dir,
            );
            assert!(cp.is_broadcast, "dest {:08x}", dest);
            assert!(!cp.is_direct_override);
        }
    }

    #[test]
    fn test_direct_override_beats_broadcast_dest() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkA, 0x1234, BROADCAST_ADDR, 0, "/status");
        let cp = classifier.classify(normalized(packet, DeliveryHint::Direct), &ids, &dir);
        assert!(!cp.is_broadcast);
        assert!(cp.is_direct_override);
    }

    #[test]
    fn test_ambiguous_fails_closed() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkA, 0x1234, BROADCAST_ADDR, 0, "/echo x");
        let cp = classifier.classify(normalized(packet, DeliveryHint::Ambiguous), &ids, &dir);
        assert!(!cp.is_broadcast);
        assert!(cp.effective_text.is_none());
    }

    #[test]
    fn test_unicast_dest_is_direct() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkA, 0x1234, 0xA0A0_A0A0, 0, "hi");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert!(!cp.is_broadcast);
        // UNKNOWN_NODE is not a broadcast sentinel either
        let packet = Packet::text(NetworkSource::NetworkA, 0x1234, UNKNOWN_NODE, 0, "hi");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert!(!cp.is_broadcast);
    }

    #[test]
    fn test_tigro_scenario() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkB, OWN_B, BROADCAST_ADDR, 0, "Tigro: /echo hi");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert!(cp.is_broadcast);
        assert!(cp.is_from_self);
        assert!(!cp.is_self_direct());
        assert_eq!(cp.resolved_sender_name.as_deref(), Some("Tigro"));
        assert_eq!(cp.command_text(), Some("/echo hi"));
    }

    #[test]
    fn test_prefix_stripping_not_gated_on_sender() {
        let (classifier, ids, dir) = fixture();
        for sender in [OWN_B, 0x0bad_cafe, UNKNOWN_NODE] {
            let packet =
                Packet::text(NetworkSource::NetworkB, sender, BROADCAST_ADDR, 0, "Ana: /ping now");
            let cp = classifier.classify(
                normalized(packet, DeliveryHint::FromDestination),
                &ids,
                &dir,
            );
            assert_eq!(cp.resolved_sender_name.as_deref(), Some("Ana"));
            assert_eq!(cp.command_text(), Some("/ping now"));
        }
    }

    #[test]
    fn test_from_self_is_per_network() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkA, OWN_B, BROADCAST_ADDR, 0, "hi");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert!(!cp.is_from_self);
    }

    #[test]
    fn test_self_direct_flagged() {
        let (classifier, ids, dir) = fixture();
        let packet = Packet::text(NetworkSource::NetworkB, OWN_B, OWN_B, 0, "/status");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert!(cp.is_self_direct());
    }

    #[test]
    fn test_direct_text_keeps_prefix_and_uses_directory() {
        let (classifier, ids, dir) = fixture();
        dir.learn(NetworkSource::NetworkA, 0x1234, "Base Camp");
        let packet = Packet::text(NetworkSource::NetworkA, 0x1234, 0xA0A0_A0A0, 0, "Bob: /echo x");
        let cp = classifier.classify(
            normalized(packet, DeliveryHint::FromDestination),
            &ids,
            &dir,
        );
        assert_eq!(cp.resolved_sender_name.as_deref(), Some("Base Camp"));
        assert_eq!(cp.command_text(), Some("Bob: /echo x"));
    }

    #[test]
    fn test_split_sender_prefix() {
        assert_eq!(split_sender_prefix("Tigro: /echo hi", '/'), Some(("Tigro", "/echo hi")));
        assert_eq!(split_sender_prefix("Tigro: hello", '/'), None);
        assert_eq!(split_sender_prefix("/echo a: /b", '/'), None);
        assert_eq!(split_sender_prefix(": /echo", '/'), None);
        assert_eq!(split_sender_prefix("no colon /echo", '/'), None);
        assert_eq!(split_sender_prefix("Zoë K: !ping", '!'), Some(("Zoë K", "!ping")));
    }
}
