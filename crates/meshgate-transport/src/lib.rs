//! Radio transports for the meshgate bridge
//!
//! This crate owns everything below the canonical packet: links to the
//! radios, stream framing, per-network record codecs, and the adapters that
//! tie them together behind one async trait.
//!
//! # Layers
//!
//! 1. **Link** - TCP socket or serial port moving raw bytes
//! 2. **Framing** - recovering frames from the byte stream, skipping radio
//!    debug output
//! 3. **Codec** - decoding frame payloads into native event records
//! 4. **Adapter** - connect, handshake, read, send, reconnect
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use meshgate_core::{MeshgateConfig, NetworkSource};
//! use meshgate_transport::build_adapter;
//!
//! let config = MeshgateConfig::load("meshgate.toml")?;
//! let mut adapter = build_adapter(NetworkSource::NetworkB, &config.network_b)?;
//! adapter.connect().await?;
//! adapter.begin_session().await?;
//!
//! loop {
//!     adapter.service().await?;
//!     if let Some(event) = adapter.read_event().await? {
//!         println!("{:?}", event);
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - serial port links via `tokio-serial` (requires `libudev-dev`
//!   on Linux)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapter;
pub mod codec;
pub mod error;
pub mod event;
pub mod framing;
pub mod link;
pub mod mock;

pub use adapter::{build_adapter, ConnectionState, MeshCoreAdapter, MeshtasticAdapter, TransportAdapter};
pub use error::{Result, TransportError};
pub use event::{
    meshcore_node_id, MeshCoreEvent, MeshtasticPort, MeshtasticRecord, RawEvent, TextType,
};
pub use framing::{FrameDecoder, FrameFormat};
pub use mock::{MockAdapter, MockControl, SentFrame};
