//! Configuration types for meshgate
//!
//! One [`MeshgateConfig`] describes both radio networks, the router, the echo
//! suppressor, health supervision and the event pipeline. Everything has a
//! default so a config file only needs to mention what it changes.
//!
//! ```toml
//! [network_a]
//! enabled = true
//! link = { type = "serial", port = "/dev/ttyUSB0" }
//!
//! [network_b]
//! enabled = true
//! node_id = "!16fad3dc"
//! link = { type = "tcp", host = "192.168.1.40", port = 5000 }
//!
//! [router]
//! broadcast_safe = ["echo", "ping", "help"]
//! throttle_window = "10s"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::packet::NetworkSource;

/// Default baud rate for serial radios
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default TCP port for Network A radios
pub const DEFAULT_NETWORK_A_TCP_PORT: u16 = 4403;

/// Default TCP port for Network B companion radios
pub const DEFAULT_NETWORK_B_TCP_PORT: u16 = 5000;

/// Default command prefix
pub const DEFAULT_COMMAND_PREFIX: char = '/';

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshgateConfig {
    /// Network A (Meshtastic-style) transport
    #[serde(default = "NetworkConfig::default_network_a")]
    pub network_a: NetworkConfig,

    /// Network B (MeshCore-style) transport
    #[serde(default = "NetworkConfig::default_network_b")]
    pub network_b: NetworkConfig,

    /// Command routing
    #[serde(default)]
    pub router: RouterConfig,

    /// Broadcast echo suppression
    #[serde(default)]
    pub echo: EchoConfig,

    /// Liveness supervision
    #[serde(default)]
    pub health: HealthConfig,

    /// Reconnection behavior
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Queue sizes and shutdown
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for MeshgateConfig {
    fn default() -> Self {
        Self {
            network_a: NetworkConfig::default_network_a(),
            network_b: NetworkConfig::default_network_b(),
            router: RouterConfig::default(),
            echo: EchoConfig::default(),
            health: HealthConfig::default(),
            reconnect: ReconnectConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl MeshgateConfig {
    /// Parse from TOML text and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MeshgateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Configuration for one network
    pub fn network(&self, source: NetworkSource) -> Option<&NetworkConfig> {
        match source {
            NetworkSource::NetworkA => Some(&self.network_a),
            NetworkSource::NetworkB => Some(&self.network_b),
            NetworkSource::Unknown => None,
        }
    }

    /// Both networks are enabled
    pub fn is_dual_configured(&self) -> bool {
        self.network_a.enabled && self.network_b.enabled
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !self.network_a.enabled && !self.network_b.enabled {
            return Err(CoreError::InvalidConfig(
                "at least one network must be enabled".to_string(),
            ));
        }

        let prefix = self.router.command_prefix;
        if prefix.is_whitespace() || prefix.is_alphanumeric() {
            return Err(CoreError::InvalidConfig(format!(
                "command prefix {:?} must be a symbol",
                prefix
            )));
        }

        if self.router.broadcast_safe.iter().any(|c| c.trim().is_empty()) {
            return Err(CoreError::InvalidConfig(
                "broadcast_safe contains an empty command".to_string(),
            ));
        }

        if self.router.max_concurrent_handlers == 0 {
            return Err(CoreError::InvalidConfig(
                "router.max_concurrent_handlers must be at least 1".to_string(),
            ));
        }

        if self.pipeline.inbound_queue == 0 || self.pipeline.outbound_queue == 0 {
            return Err(CoreError::InvalidConfig(
                "pipeline queue sizes must be non-zero".to_string(),
            ));
        }

        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(CoreError::InvalidConfig(format!(
                "reconnect.initial_delay ({}) exceeds reconnect.max_delay ({})",
                humantime::format_duration(self.reconnect.initial_delay),
                humantime::format_duration(self.reconnect.max_delay)
            )));
        }

        if self.health.check_interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "health.check_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings for one radio network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Whether this network should be brought up
    #[serde(default)]
    pub enabled: bool,

    /// How to reach the radio
    pub link: LinkConfig,

    /// Our node id on this network. Learned during handshake when unset.
    #[serde(default, with = "node_id_serde")]
    pub node_id: Option<u32>,

    /// Channel used for unsolicited broadcasts
    #[serde(default)]
    pub primary_channel: u8,
}

impl NetworkConfig {
    fn default_network_a() -> Self {
        Self {
            enabled: true,
            link: LinkConfig::Serial {
                port: PathBuf::from("/dev/ttyUSB0"),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            node_id: None,
            primary_channel: 0,
        }
    }

    fn default_network_b() -> Self {
        Self {
            enabled: false,
            link: LinkConfig::Tcp {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_NETWORK_B_TCP_PORT,
            },
            node_id: None,
            primary_channel: 0,
        }
    }
}

/// Physical link to a radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    /// Serial port (USB radios)
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0, COM3)
        port: PathBuf,
        /// Baud rate (default: 115200)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// TCP socket (networked radios)
    Tcp {
        /// Host address
        host: String,
        /// Port number
        port: u16,
    },
}

impl LinkConfig {
    /// Human-readable endpoint, used in adapter names
    pub fn endpoint(&self) -> String {
        match self {
            LinkConfig::Serial { port, .. } => format!("serial:{}", port.display()),
            LinkConfig::Tcp { host, port } => format!("tcp:{}:{}", host, port),
        }
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Command routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Character that marks a command
    #[serde(default = "default_command_prefix")]
    pub command_prefix: char,

    /// Commands allowed to run when received as broadcast
    #[serde(default = "default_broadcast_safe")]
    pub broadcast_safe: Vec<String>,

    /// Minimum spacing between dispatches for one sender (0 = disabled)
    #[serde(with = "humantime_serde", default = "default_throttle_window")]
    pub throttle_window: Duration,

    /// Number of senders tracked by the throttle
    #[serde(default = "default_throttle_capacity")]
    pub throttle_capacity: usize,

    /// Handler invocations allowed to run at once
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,

    /// Commands per network accepted while every handler slot is busy
    #[serde(default = "default_handler_backlog")]
    pub handler_backlog: usize,
}

fn default_command_prefix() -> char {
    DEFAULT_COMMAND_PREFIX
}

fn default_broadcast_safe() -> Vec<String> {
    vec!["echo".to_string(), "ping".to_string(), "help".to_string()]
}

fn default_throttle_window() -> Duration {
    Duration::ZERO
}

fn default_throttle_capacity() -> usize {
    1024
}

fn default_max_concurrent_handlers() -> usize {
    8
}

fn default_handler_backlog() -> usize {
    32
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            command_prefix: DEFAULT_COMMAND_PREFIX,
            broadcast_safe: default_broadcast_safe(),
            throttle_window: Duration::ZERO,
            throttle_capacity: 1024,
            max_concurrent_handlers: 8,
            handler_backlog: 32,
        }
    }
}

/// Broadcast echo suppression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    /// How long an outgoing broadcast is remembered
    #[serde(with = "humantime_serde", default = "default_echo_ttl")]
    pub ttl: Duration,

    /// Maximum remembered broadcasts
    #[serde(default = "default_echo_capacity")]
    pub capacity: usize,
}

fn default_echo_ttl() -> Duration {
    Duration::from_secs(5)
}

fn default_echo_capacity() -> usize {
    256
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            capacity: 256,
        }
    }
}

/// Liveness supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How often adapters are checked
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Silence longer than this raises a liveness warning
    #[serde(with = "humantime_serde", default = "default_stale_threshold")]
    pub stale_threshold: Duration,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(300)
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(300),
        }
    }
}

/// Reconnection behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    #[serde(default = "default_auto_reconnect")]
    pub enabled: bool,

    /// Initial delay before first reconnection attempt
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Maximum delay between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Maximum number of reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Infinite
        }
    }
}

/// Event pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the shared inbound queue
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,

    /// Capacity of each adapter's outbound queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Time adapters get to flush before being force-closed
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_inbound_queue() -> usize {
    256
}

fn default_outbound_queue() -> usize {
    64
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inbound_queue: 256,
            outbound_queue: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Builder for MeshgateConfig
#[derive(Debug, Default)]
pub struct MeshgateConfigBuilder {
    config: MeshgateConfig,
}

impl MeshgateConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable a network
    pub fn enable(mut self, source: NetworkSource, enabled: bool) -> Self {
        if let Some(network) = self.network_mut(source) {
            network.enabled = enabled;
        }
        self
    }

    /// Enable both networks
    pub fn dual(self) -> Self {
        self.enable(NetworkSource::NetworkA, true)
            .enable(NetworkSource::NetworkB, true)
    }

    /// Set the link for a network
    pub fn link(mut self, source: NetworkSource, link: LinkConfig) -> Self {
        if let Some(network) = self.network_mut(source) {
            network.link = link;
        }
        self
    }

    /// Pin our node id on a network
    pub fn node_id(mut self, source: NetworkSource, node_id: u32) -> Self {
        if let Some(network) = self.network_mut(source) {
            network.node_id = Some(node_id);
        }
        self
    }

    /// Set the broadcast-safe command list
    pub fn broadcast_safe<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.router.broadcast_safe = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-sender throttle window
    pub fn throttle_window(mut self, window: Duration) -> Self {
        self.config.router.throttle_window = window;
        self
    }

    /// Set the handler pool size and the per-network backlog
    pub fn handlers(mut self, max_concurrent: usize, backlog: usize) -> Self {
        self.config.router.max_concurrent_handlers = max_concurrent;
        self.config.router.handler_backlog = backlog;
        self
    }

    /// Set the inbound and per-network outbound queue sizes
    pub fn queues(mut self, inbound: usize, outbound: usize) -> Self {
        self.config.pipeline.inbound_queue = inbound;
        self.config.pipeline.outbound_queue = outbound;
        self
    }

    /// Set the echo suppression TTL
    pub fn echo_ttl(mut self, ttl: Duration) -> Self {
        self.config.echo.ttl = ttl;
        self
    }

    /// Set health check interval and stale threshold
    pub fn health(mut self, check_interval: Duration, stale_threshold: Duration) -> Self {
        self.config.health.check_interval = check_interval;
        self.config.health.stale_threshold = stale_threshold;
        self
    }

    /// Set reconnect backoff bounds
    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect.initial_delay = initial;
        self.config.reconnect.max_delay = max;
        self
    }

    /// Enable or disable auto-reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect.enabled = enabled;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.pipeline.shutdown_grace = grace;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshgateConfig {
        self.config
    }

    fn network_mut(&mut self, source: NetworkSource) -> Option<&mut NetworkConfig> {
        match source {
            NetworkSource::NetworkA => Some(&mut self.config.network_a),
            NetworkSource::NetworkB => Some(&mut self.config.network_b),
            NetworkSource::Unknown => None,
        }
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// Node ids may be written as integers or as "!16fad3dc" / "0x16fad3dc"
mod node_id_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNodeId {
        Number(u32),
        Text(String),
    }

    pub fn serialize<S>(node_id: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match node_id {
            Some(id) => serializer.serialize_str(&format!("!{:08x}", id)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RawNodeId>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(RawNodeId::Number(n)) => Ok(Some(n)),
            Some(RawNodeId::Text(s)) => {
                let hex = s
                    .strip_prefix('!')
                    .or_else(|| s.strip_prefix("0x"))
                    .unwrap_or(&s);
                u32::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom(format!("invalid node id: {}", s)))
            }
        }
    }
}
