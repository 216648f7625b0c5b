//! Health supervision
//!
//! [`HealthSupervisor`] runs on its own interval, independent of packet
//! flow. A connected adapter that has been silent longer than the stale
//! threshold gets a liveness warning; silence is a valid network state, so
//! nothing else happens. Reconnection itself is done by each adapter's
//! lifecycle task using [`Backoff`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshgate_core::{HealthConfig, NetworkSource, ReconnectConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::echo::EchoSuppressor;
use crate::status::AdapterStatus;

/// Bounded exponential backoff for reconnects
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff; `max_attempts == 0` retries forever
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
            attempts: 0,
        }
    }

    /// Create from reconnect configuration
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay, config.max_delay, config.max_attempts)
    }

    /// Delay before the next attempt, or `None` when attempts are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        let delay = self
            .initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max));
        self.attempts += 1;
        Some(delay)
    }

    /// Start over after a success
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Periodic liveness checks
#[derive(Debug)]
pub struct HealthSupervisor {
    statuses: Vec<Arc<AdapterStatus>>,
    echo: Arc<EchoSuppressor>,
    check_interval: Duration,
    stale_threshold: Duration,
}

impl HealthSupervisor {
    /// Create a supervisor over the given adapters
    pub fn new(
        config: &HealthConfig,
        statuses: Vec<Arc<AdapterStatus>>,
        echo: Arc<EchoSuppressor>,
    ) -> Self {
        Self {
            statuses,
            echo,
            check_interval: config.check_interval,
            stale_threshold: config.stale_threshold,
        }
    }

    /// Run one check, returning the networks that are stale
    pub fn check_at(&self, now: Instant) -> Vec<NetworkSource> {
        let mut stale = Vec::new();

        for status in &self.statuses {
            if !status.is_active() || !status.is_connected() {
                continue;
            }
            let Some(quiet) = status.quiet_for(now) else {
                continue;
            };

            if quiet > self.stale_threshold {
                stale.push(status.source());
                let was_alive = status.set_alive(false);
                if was_alive {
                    warn!(
                        source = %status.source(),
                        silent_secs = quiet.as_secs(),
                        threshold_secs = self.stale_threshold.as_secs(),
                        "No radio traffic for a while; link may be dead"
                    );
                } else {
                    debug!(source = %status.source(), silent_secs = quiet.as_secs(), "Still silent");
                }
            } else if !status.set_alive(true) {
                info!(source = %status.source(), "Radio traffic resumed");
            }
        }

        let purged = self.echo.purge_expired_at(now);
        if purged > 0 {
            debug!(purged, "Purged expired echo entries");
        }
        stale
    }

    /// Run until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Health supervisor stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.check_at(Instant::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0);
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_unlimited_survives_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0);
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_backoff_limited() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);
    }

    fn supervisor(status: Arc<AdapterStatus>) -> HealthSupervisor {
        let config = HealthConfig {
            check_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(300),
        };
        HealthSupervisor::new(&config, vec![status], Arc::new(EchoSuppressor::default()))
    }

    #[test]
    fn test_stale_adapter_flagged_not_disconnected() {
        let status = Arc::new(AdapterStatus::new(NetworkSource::NetworkA, true));
        let t = Instant::now();
        status.mark_active("a", None, t);
        let supervisor = supervisor(status.clone());

        assert!(supervisor.check_at(t + Duration::from_secs(200)).is_empty());
        assert_eq!(
            supervisor.check_at(t + Duration::from_secs(301)),
            vec![NetworkSource::NetworkA]
        );
        let report = status.report(t + Duration::from_secs(301));
        assert!(!report.alive);
        assert!(report.connected);

        status.touch(t + Duration::from_secs(400));
        assert!(supervisor.check_at(t + Duration::from_secs(410)).is_empty());
        assert!(status.report(t).alive);
    }

    #[test]
    fn test_disconnected_adapter_not_checked() {
        let status = Arc::new(AdapterStatus::new(NetworkSource::NetworkB, true));
        let t = Instant::now();
        status.mark_active("b", None, t);
        status.mark_disconnected("gone");
        assert!(supervisor(status).check_at(t + Duration::from_secs(900)).is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let status = Arc::new(AdapterStatus::new(NetworkSource::NetworkA, true));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(supervisor(status).run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
