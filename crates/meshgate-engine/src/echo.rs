//! Broadcast echo suppressor
//!
//! When we broadcast a reply, the mesh may hand the same text straight back
//! to us as a fresh inbound broadcast. Without suppression a reply to
//! `/echo /echo` would trigger itself forever.
//!
//! The suppressor remembers a content hash of every broadcast we send for a
//! short TTL. The key is the message content, not the sender id: the node
//! that issued a command may be the very node we transmit from.
//!
//! Entries are only created by [`EchoSuppressor::record_outgoing`]; checking
//! an inbound text never creates one, so duplicate inbound deliveries are not
//! affected.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use meshgate_core::EchoConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

type ContentHash = [u8; 32];

/// Suppressor statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EchoStats {
    /// Outgoing broadcasts recorded
    pub recorded: u64,
    /// Inbound texts checked
    pub checks: u64,
    /// Inbound texts found to be echoes
    pub echoes_suppressed: u64,
    /// Entries found expired during checks or purges
    pub ttl_expirations: u64,
    /// Entries evicted by capacity
    pub lru_evictions: u64,
}

#[derive(Debug)]
struct EchoState {
    entries: LruCache<ContentHash, Instant>,
    stats: EchoStats,
}

/// Content-hash cache of our recent outgoing broadcasts
#[derive(Debug)]
pub struct EchoSuppressor {
    state: Mutex<EchoState>,
    ttl: Duration,
}

fn content_hash(text: &str) -> ContentHash {
    *blake3::hash(text.trim().as_bytes()).as_bytes()
}

impl EchoSuppressor {
    /// Create a suppressor with the given capacity and TTL
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(EchoState {
                entries: LruCache::new(capacity),
                stats: EchoStats::default(),
            }),
            ttl,
        }
    }

    /// Create from configuration
    pub fn from_config(config: &EchoConfig) -> Self {
        Self::new(config.capacity, config.ttl)
    }

    /// Remember a broadcast we are about to send
    pub fn record_outgoing(&self, text: &str) {
        self.record_outgoing_at(text, Instant::now());
    }

    /// [`record_outgoing`](Self::record_outgoing) with an explicit clock
    pub fn record_outgoing_at(&self, text: &str, now: Instant) {
        let hash = content_hash(text);
        let mut state = self.state.lock();

        let evicts = !state.entries.contains(&hash)
            && state.entries.len() >= state.entries.cap().get();
        state.entries.put(hash, now);
        state.stats.recorded += 1;
        if evicts {
            state.stats.lru_evictions += 1;
        }
        trace!(len = text.len(), "Recorded outgoing broadcast");
    }

    /// Whether `text` matches a broadcast we sent within the TTL
    pub fn is_echo(&self, text: &str) -> bool {
        self.is_echo_at(text, Instant::now())
    }

    /// [`is_echo`](Self::is_echo) with an explicit clock
    pub fn is_echo_at(&self, text: &str, now: Instant) -> bool {
        let hash = content_hash(text);
        let mut state = self.state.lock();
        state.stats.checks += 1;

        let Some(sent_at) = state.entries.peek(&hash).copied() else {
            return false;
        };

        if now.saturating_duration_since(sent_at) > self.ttl {
            state.entries.pop(&hash);
            state.stats.ttl_expirations += 1;
            trace!("Echo entry expired");
            return false;
        }

        state.stats.echoes_suppressed += 1;
        debug!(len = text.len(), "Inbound broadcast matches our own recent send");
        true
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// [`purge_expired`](Self::purge_expired) with an explicit clock
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<ContentHash> = state
            .entries
            .iter()
            .filter(|(_, sent_at)| now.saturating_duration_since(**sent_at) > self.ttl)
            .map(|(hash, _)| *hash)
            .collect();

        for hash in &expired {
            state.entries.pop(hash);
        }
        state.stats.ttl_expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Statistics snapshot
    pub fn stats(&self) -> EchoStats {
        self.state.lock().stats.clone()
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::from_config(&EchoConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_within_ttl_is_suppressed() {
        let echo = EchoSuppressor::new(16, Duration::from_secs(5));
        let t = Instant::now();
        echo.record_outgoing_at("hi", t);

        assert!(echo.is_echo_at("hi", t + Duration::from_secs(1)));
        assert!(!echo.is_echo_at("hi", t + Duration::from_secs(10)));
    }

    #[test]
    fn test_checking_never_records() {
        let echo = EchoSuppressor::new(16, Duration::from_secs(5));
        let t = Instant::now();
        assert!(!echo.is_echo_at("/echo hi", t));
        assert!(!echo.is_echo_at("/echo hi", t + Duration::from_millis(500)));
        assert!(echo.is_empty());
    }

    #[test]
    fn test_content_not_sender_keyed() {
        let echo = EchoSuppressor::new(16, Duration::from_secs(5));
        let t = Instant::now();
        echo.record_outgoing_at("pong", t);
        assert!(!echo.is_echo_at("pong!", t));
        assert!(echo.is_echo_at("  pong\n", t));
    }

    #[test]
    fn test_capacity_bound() {
        let echo = EchoSuppressor::new(2, Duration::from_secs(5));
        let t = Instant::now();
        echo.record_outgoing_at("a", t);
        echo.record_outgoing_at("b", t);
        echo.record_outgoing_at("c", t);
        assert_eq!(echo.len(), 2);
        assert!(!echo.is_echo_at("a", t));
        assert_eq!(echo.stats().lru_evictions, 1);
    }

    #[test]
    fn test_purge_expired() {
        let echo = EchoSuppressor::new(16, Duration::from_secs(5));
        let t = Instant::now();
        echo.record_outgoing_at("old", t);
        echo.record_outgoing_at("new", t + Duration::from_secs(4));
        assert_eq!(echo.purge_expired_at(t + Duration::from_secs(6)), 1);
        assert_eq!(echo.len(), 1);
    }

    #[test]
    fn test_stats() {
        let echo = EchoSuppressor::new(16, Duration::from_secs(5));
        let t = Instant::now();
        echo.record_outgoing_at("x", t);
        echo.is_echo_at("x", t);
        echo.is_echo_at("y", t);
        let stats = echo.stats();
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.echoes_suppressed, 1);
    }
}
