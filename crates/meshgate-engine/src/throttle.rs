//! Per-sender command throttle
//!
//! Limits how often one sender can trigger a handler. The key combines the
//! network, the sender id and the resolved sender name, so several people
//! behind one aggregating node are throttled separately. A zero window
//! disables throttling.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use meshgate_core::{ClassifiedPacket, NetworkSource};
use parking_lot::Mutex;
use tracing::debug;

/// Identity a throttle window applies to
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ThrottleKey {
    /// Network the sender is on
    pub source: NetworkSource,
    /// Sender node id
    pub sender_id: u32,
    /// Resolved sender name, when known
    pub name: Option<String>,
}

impl ThrottleKey {
    /// Key for a classified packet
    pub fn for_packet(cp: &ClassifiedPacket) -> Self {
        Self {
            source: cp.source(),
            sender_id: cp.packet.sender_id(),
            name: cp.resolved_sender_name.clone(),
        }
    }
}

/// Sliding per-sender throttle
#[derive(Debug)]
pub struct SenderThrottle {
    window: Duration,
    last_dispatch: Mutex<LruCache<ThrottleKey, Instant>>,
}

impl SenderThrottle {
    /// Create a throttle remembering up to `capacity` senders
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            last_dispatch: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether throttling is active
    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Check and record a dispatch for `key`
    ///
    /// Returns `true` if the sender may proceed.
    pub fn allow(&self, key: &ThrottleKey) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock
    pub fn allow_at(&self, key: &ThrottleKey, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut last = self.last_dispatch.lock();
        if let Some(previous) = last.get(key) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < self.window {
                debug!(
                    source = %key.source,
                    sender = format!("0x{:08X}", key.sender_id),
                    remaining_ms = (self.window - elapsed).as_millis() as u64,
                    "Sender throttled"
                );
                return false;
            }
        }
        last.put(key.clone(), now);
        true
    }

    /// Configured window
    pub fn window(&self) -> Duration {
        self.window
    }
}
