//! Transport adapters for both radio networks
//!
//! An adapter owns one radio link and hides its wire protocol behind
//! [`TransportAdapter`]:
//!
//! - [`MeshtasticAdapter`] - Network A (0x94C3-framed packet records)
//! - [`MeshCoreAdapter`] - Network B (companion command/response frames)
//!
//! Adapters own no routing logic. They are driven by a single lifecycle task
//! that reads events, forwards sends and reconnects on failure.

mod meshcore;
mod meshtastic;

pub use meshcore::MeshCoreAdapter;
pub use meshtastic::MeshtasticAdapter;

use std::time::Duration;

use async_trait::async_trait;
use meshgate_core::{LinkConfig, NetworkConfig, NetworkSource};
use tracing::info;

use crate::error::{Result, TransportError};
use crate::event::RawEvent;

/// How long to wait for a link to open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a radio has to finish its session handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a single `read_event` call waits for bytes
pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(250);

/// Trait for radio transport adapters
///
/// All methods take `&mut self`: an adapter is owned by exactly one task.
/// `read_event` must be cancel-safe so the owner can select over it; any
/// protocol writes it needs are deferred to [`TransportAdapter::service`].
#[async_trait]
pub trait TransportAdapter: Send {
    /// Open the link to the radio
    async fn connect(&mut self) -> Result<()>;

    /// Run the radio handshake and learn our identity
    ///
    /// A failure here means the read loop cannot start.
    async fn begin_session(&mut self) -> Result<()>;

    /// Close the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Read the next inbound event
    ///
    /// Returns `None` if nothing arrived within the poll interval.
    /// Returns `Err` on connection/read errors.
    async fn read_event(&mut self) -> Result<Option<RawEvent>>;

    /// Perform protocol upkeep requested by earlier reads
    async fn service(&mut self) -> Result<()> {
        Ok(())
    }

    /// Send text to every node on a channel
    async fn send_broadcast(&mut self, channel: u8, payload: &[u8]) -> Result<()>;

    /// Send text to one node
    async fn send_direct(&mut self, node_id: u32, payload: &[u8]) -> Result<()>;

    /// Tear the link down and bring it back up, handshake included
    async fn reconnect(&mut self) -> Result<()> {
        let _ = self.disconnect().await;
        self.connect().await?;
        self.begin_session().await
    }

    /// Adapter name (for logging)
    fn name(&self) -> &str;

    /// Network this adapter serves
    fn source(&self) -> NetworkSource;

    /// Our node id as reported by the radio
    fn local_node_id(&self) -> Option<u32>;

    /// Longest text payload one send accepts
    fn max_text_len(&self) -> usize;
}

/// Connection state for adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, may reconnect
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Construct the adapter for one configured network
///
/// Errors here are construction failures: the link type cannot be used by
/// this build, or the source has no radio family.
pub fn build_adapter(
    source: NetworkSource,
    config: &NetworkConfig,
) -> Result<Box<dyn TransportAdapter>> {
    #[cfg(not(feature = "serial"))]
    if let LinkConfig::Serial { port, .. } = &config.link {
        return Err(TransportError::Unsupported(format!(
            "{} is configured for serial port {} but this build lacks the `serial` feature",
            source,
            port.display()
        )));
    }

    let adapter: Box<dyn TransportAdapter> = match source {
        NetworkSource::NetworkA => Box::new(MeshtasticAdapter::new(config.link.clone())),
        NetworkSource::NetworkB => Box::new(MeshCoreAdapter::new(config.link.clone())),
        NetworkSource::Unknown => {
            return Err(TransportError::Unsupported(
                "no adapter for unknown network".to_string(),
            ))
        }
    };

    info!(source = %source, adapter = adapter.name(), "Built transport adapter");
    Ok(adapter)
}

fn adapter_name(prefix: &str, link: &LinkConfig) -> String {
    format!("{}@{}", prefix, link.endpoint())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_network() -> NetworkConfig {
        NetworkConfig {
            enabled: true,
            link: LinkConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 4403,
            },
            node_id: None,
            primary_channel: 0,
        }
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_build_adapter_per_source() {
        let a = build_adapter(NetworkSource::NetworkA, &tcp_network()).unwrap();
        assert_eq!(a.source(), NetworkSource::NetworkA);
        assert_eq!(a.name(), "network_a@tcp:127.0.0.1:4403");
        assert!(!a.is_connected());

        let b = build_adapter(NetworkSource::NetworkB, &tcp_network()).unwrap();
        assert_eq!(b.source(), NetworkSource::NetworkB);
        assert!(b.max_text_len() < a.max_text_len());
    }

    #[test]
    fn test_build_adapter_unknown_source() {
        assert!(build_adapter(NetworkSource::Unknown, &tcp_network()).is_err());
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn test_build_adapter_serial_without_feature() {
        let mut config = tcp_network();
        config.link = LinkConfig::Serial {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115200,
        };
        let err = build_adapter(NetworkSource::NetworkA, &config).err().unwrap();
        assert_eq!(err.error_code(), "UNSUPPORTED");
    }
}
