//! Per-adapter runtime status
//!
//! Written by the adapter's lifecycle task, read by the health supervisor
//! and the diagnostics query.

use std::time::Instant;

use chrono::{DateTime, Utc};
use meshgate_core::{format_node_id, NetworkSource};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Default)]
struct StatusInner {
    name: Option<String>,
    active: bool,
    connected: bool,
    alive: bool,
    node_id: Option<u32>,
    /// Last event, or when the link last came up if nothing arrived since
    quiet_since: Option<Instant>,
    last_event_at: Option<DateTime<Utc>>,
    events_received: u64,
    reconnect_attempts: u64,
    reconnects: u64,
    last_error: Option<String>,
    startup_failure: Option<String>,
}

/// Shared status of one network's adapter
#[derive(Debug)]
pub struct AdapterStatus {
    source: NetworkSource,
    configured: bool,
    inner: Mutex<StatusInner>,
}

impl AdapterStatus {
    /// Status for a network, `configured` if it is enabled in config
    pub fn new(source: NetworkSource, configured: bool) -> Self {
        Self {
            source,
            configured,
            inner: Mutex::new(StatusInner::default()),
        }
    }

    /// Network this status describes
    pub fn source(&self) -> NetworkSource {
        self.source
    }

    /// Whether the network is enabled in config
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Adapter came up at startup
    pub fn mark_active(&self, name: &str, node_id: Option<u32>, now: Instant) {
        let mut inner = self.inner.lock();
        inner.name = Some(name.to_string());
        inner.active = true;
        inner.connected = true;
        inner.alive = true;
        inner.node_id = node_id;
        inner.quiet_since = Some(now);
    }

    /// Adapter could not be brought up at startup
    pub fn mark_startup_failed(&self, reason: String) {
        let mut inner = self.inner.lock();
        inner.active = false;
        inner.connected = false;
        inner.alive = false;
        inner.last_error = Some(reason.clone());
        inner.startup_failure = Some(reason);
    }

    /// An event arrived
    pub fn touch(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.events_received += 1;
        inner.quiet_since = Some(now);
        inner.last_event_at = Some(Utc::now());
        inner.alive = true;
    }

    /// Link dropped
    pub fn mark_disconnected(&self, error: &str) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.last_error = Some(error.to_string());
    }

    /// A reconnect attempt is starting
    pub fn mark_reconnect_attempt(&self) {
        self.inner.lock().reconnect_attempts += 1;
    }

    /// A reconnect attempt failed
    pub fn mark_reconnect_failed(&self, error: &str) {
        self.inner.lock().last_error = Some(error.to_string());
    }

    /// Link is back, or came up for the first time after a startup failure
    pub fn mark_reconnected(&self, name: &str, node_id: Option<u32>, now: Instant) {
        let mut inner = self.inner.lock();
        inner.name = Some(name.to_string());
        inner.active = true;
        inner.connected = true;
        inner.alive = true;
        inner.reconnects += 1;
        inner.quiet_since = Some(now);
        if node_id.is_some() {
            inner.node_id = node_id;
        }
    }

    /// Adapter stopped for shutdown
    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.active = false;
    }

    /// Set the liveness flag, returning the previous value
    pub fn set_alive(&self, alive: bool) -> bool {
        std::mem::replace(&mut self.inner.lock().alive, alive)
    }

    /// Whether the adapter is running (has been up and not stopped)
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Whether the link is currently up
    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Time since the last event (or since the link came up)
    pub fn quiet_for(&self, now: Instant) -> Option<std::time::Duration> {
        self.inner
            .lock()
            .quiet_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Snapshot for diagnostics
    pub fn report(&self, now: Instant) -> AdapterReport {
        let inner = self.inner.lock();
        AdapterReport {
            source: self.source,
            configured: self.configured,
            name: inner.name.clone(),
            active: inner.active,
            connected: inner.connected,
            alive: inner.alive,
            node_id: inner.node_id.map(format_node_id),
            events_received: inner.events_received,
            last_event_at: inner.last_event_at,
            last_event_age_secs: inner
                .quiet_since
                .filter(|_| inner.last_event_at.is_some())
                .map(|since| now.saturating_duration_since(since).as_secs()),
            reconnect_attempts: inner.reconnect_attempts,
            reconnects: inner.reconnects,
            last_error: inner.last_error.clone(),
            startup_failure: inner.startup_failure.clone(),
        }
    }
}

/// Adapter status as reported by diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterReport {
    /// Network
    pub source: NetworkSource,
    /// Enabled in config
    pub configured: bool,
    /// Adapter name, once constructed
    pub name: Option<String>,
    /// Came up at startup and still running
    pub active: bool,
    /// Link currently up
    pub connected: bool,
    /// Heard from recently
    pub alive: bool,
    /// Our node id on this network
    pub node_id: Option<String>,
    /// Events read since startup
    pub events_received: u64,
    /// Wall-clock time of the last event
    pub last_event_at: Option<DateTime<Utc>>,
    /// Seconds since the last event
    pub last_event_age_secs: Option<u64>,
    /// Reconnect attempts made
    pub reconnect_attempts: u64,
    /// Successful reconnects
    pub reconnects: u64,
    /// Most recent error
    pub last_error: Option<String>,
    /// Why the adapter did not come up at startup
    pub startup_failure: Option<String>,
}
