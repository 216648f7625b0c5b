//! Node directory and own-identity table
//!
//! [`NodeDirectory`] remembers display names heard in node-info packets and
//! adverts, per network, so a sender can be named even when its text carries
//! no `"Name: "` prefix. [`OwnNodeIds`] holds this process's node id on each
//! network: a configured override when present, otherwise whatever the
//! adapter learned during its handshake.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use meshgate_core::{format_node_id, NetworkSource, Packet, PayloadKind, UNKNOWN_NODE};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::normalizer::META_NODE_NAME;

/// Default number of remembered node names
pub const DEFAULT_DIRECTORY_CAPACITY: usize = 1024;

/// Longest display name kept
const MAX_NAME_LEN: usize = 64;

/// Names of nodes heard on each network
#[derive(Debug)]
pub struct NodeDirectory {
    names: Mutex<LruCache<(NetworkSource, u32), String>>,
}

impl NodeDirectory {
    /// Create a directory with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DIRECTORY_CAPACITY)
    }

    /// Create a directory holding at most `capacity` names
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            names: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record a name for a node
    pub fn learn(&self, source: NetworkSource, node_id: u32, name: &str) {
        let name = name.trim();
        if name.is_empty() || node_id == UNKNOWN_NODE {
            return;
        }
        let name: String = name.chars().take(MAX_NAME_LEN).collect();

        let mut names = self.names.lock();
        let changed = names.peek(&(source, node_id)) != Some(&name);
        if changed {
            debug!(
                source = %source,
                node = %format_node_id(node_id),
                name = %name,
                "Learned node name"
            );
        }
        names.put((source, node_id), name);
    }

    /// Learn from a node-info packet; other packets are ignored
    pub fn learn_from_packet(&self, packet: &Packet) {
        if packet.payload_kind() != PayloadKind::NodeInfo {
            return;
        }
        if let Some(name) = packet.meta(META_NODE_NAME).and_then(|v| v.as_str()) {
            self.learn(packet.network_source(), packet.sender_id(), name);
        }
    }

    /// Look up a node's name
    pub fn lookup(&self, source: NetworkSource, node_id: u32) -> Option<String> {
        self.names.lock().get(&(source, node_id)).cloned()
    }

    /// Number of known names
    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    /// Whether no names are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct OwnIdEntry {
    configured: Option<u32>,
    learned: Option<u32>,
}

/// Our node id on each network
#[derive(Debug, Default)]
pub struct OwnNodeIds {
    entries: RwLock<HashMap<NetworkSource, OwnIdEntry>>,
}

impl OwnNodeIds {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin our id on a network; learned ids no longer apply
    pub fn set_configured(&self, source: NetworkSource, node_id: u32) {
        info!(source = %source, node = %format_node_id(node_id), "Using configured node id");
        self.entries.write().entry(source).or_default().configured = Some(node_id);
    }

    /// Record the id an adapter reported after connecting
    pub fn learn(&self, source: NetworkSource, node_id: Option<u32>) {
        let mut entries = self.entries.write();
        let entry = entries.entry(source).or_default();
        if let (Some(configured), Some(reported)) = (entry.configured, node_id) {
            if configured != reported {
                warn!(
                    source = %source,
                    configured = %format_node_id(configured),
                    reported = %format_node_id(reported),
                    "Radio reports a different node id than configured"
                );
            }
        }
        entry.learned = node_id;
    }

    /// Effective id on a network
    pub fn get(&self, source: NetworkSource) -> Option<u32> {
        self.entries
            .read()
            .get(&source)
            .and_then(|entry| entry.configured.or(entry.learned))
    }

    /// Whether `node_id` is us on `source`
    pub fn is_own(&self, source: NetworkSource, node_id: u32) -> bool {
        self.get(source) == Some(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_core::BROADCAST_ADDR;

    #[test]
    fn test_learn_and_lookup_per_network() {
        let directory = NodeDirectory::new();
        directory.learn(NetworkSource::NetworkA, 0x1234, "  Base Camp ");
        assert_eq!(
            directory.lookup(NetworkSource::NetworkA, 0x1234),
            Some("Base Camp".to_string())
        );
        assert_eq!(directory.lookup(NetworkSource::NetworkB, 0x1234), None);
    }

    #[test]
    fn test_ignores_empty_and_unknown() {
        let directory = NodeDirectory::new();
        directory.learn(NetworkSource::NetworkA, 0x1234, "   ");
        directory.learn(NetworkSource::NetworkA, UNKNOWN_NODE, "ghost");
        assert!(directory.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let directory = NodeDirectory::with_capacity(2);
        directory.learn(NetworkSource::NetworkA, 1, "one");
        directory.learn(NetworkSource::NetworkA, 2, "two");
        directory.learn(NetworkSource::NetworkA, 3, "three");
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.lookup(NetworkSource::NetworkA, 1), None);
    }

    #[test]
    fn test_learn_from_node_info_packet() {
        let directory = NodeDirectory::new();
        let packet = Packet::builder(NetworkSource::NetworkB)
            .sender(0xABCD)
            .dest(BROADCAST_ADDR)
            .kind(PayloadKind::NodeInfo)
            .meta(META_NODE_NAME, "Tigro")
            .build();
        directory.learn_from_packet(&packet);
        assert_eq!(
            directory.lookup(NetworkSource::NetworkB, 0xABCD).as_deref(),
            Some("Tigro")
        );

        let text = Packet::text(NetworkSource::NetworkB, 0x9, BROADCAST_ADDR, 0, "hi");
        directory.learn_from_packet(&text);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_configured_id_wins() {
        let ids = OwnNodeIds::new();
        ids.learn(NetworkSource::NetworkA, Some(0x1111));
        assert_eq!(ids.get(NetworkSource::NetworkA), Some(0x1111));

        ids.set_configured(NetworkSource::NetworkA, 0x2222);
        ids.learn(NetworkSource::NetworkA, Some(0x3333));
        assert_eq!(ids.get(NetworkSource::NetworkA), Some(0x2222));
        assert!(ids.is_own(NetworkSource::NetworkA, 0x2222));
        assert!(!ids.is_own(NetworkSource::NetworkB, 0x2222));
    }

    #[test]
    fn test_ids_are_per_network() {
        let ids = OwnNodeIds::new();
        ids.learn(NetworkSource::NetworkB, Some(0x16fa_d3dc));
        assert!(ids.is_own(NetworkSource::NetworkB, 0x16fa_d3dc));
        assert!(!ids.is_own(NetworkSource::NetworkA, 0x16fa_d3dc));
        assert_eq!(ids.get(NetworkSource::Unknown), None);
    }
}
