//! Core types for meshgate
//!
//! This crate holds the pieces every other meshgate crate agrees on:
//!
//! - [`packet`] - the canonical [`Packet`] and the derived [`ClassifiedPacket`]
//! - [`config`] - [`MeshgateConfig`] and its TOML loading
//! - [`error`] - configuration errors

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod packet;

pub use config::{
    EchoConfig, HealthConfig, LinkConfig, MeshgateConfig, MeshgateConfigBuilder, NetworkConfig,
    PipelineConfig, ReconnectConfig, RouterConfig, DEFAULT_BAUD_RATE, DEFAULT_COMMAND_PREFIX,
    DEFAULT_NETWORK_A_TCP_PORT, DEFAULT_NETWORK_B_TCP_PORT,
};
pub use error::{CoreError, Result};
pub use packet::{
    format_node_id, is_broadcast_dest, ClassifiedPacket, NetworkSource, Packet, PacketBuilder,
    PayloadKind, BROADCAST_ADDR, BROADCAST_ZERO, UNKNOWN_NODE,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
