//! Routing engine for the meshgate bridge
//!
//! Takes raw events from up to two radio networks, turns them into
//! canonical packets, decides whether each one is a command meant for us,
//! and runs the matching handler. Replies go back out on the network the
//! command arrived on.
//!
//! # Flow
//!
//! 1. **Normalize** - native records become [`meshgate_core::Packet`]s
//! 2. **Classify** - broadcast or direct, from self or not, sender name
//! 3. **Route** - self-direct, echo, command, broadcast-safe, throttle
//! 4. **Dispatch** - handler runs on a bounded worker pool
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use meshgate_core::{MeshgateConfig, NetworkSource};
//! use meshgate_engine::{register_builtin_handlers, AdapterSlot, Engine, HandlerRegistry};
//! use meshgate_transport::build_adapter;
//!
//! let config = MeshgateConfig::load("meshgate.toml")?;
//! let slot_a = AdapterSlot::from_build(
//!     config.network_a.enabled,
//!     build_adapter(NetworkSource::NetworkA, &config.network_a),
//! );
//! let slot_b = AdapterSlot::from_build(
//!     config.network_b.enabled,
//!     build_adapter(NetworkSource::NetworkB, &config.network_b),
//! );
//!
//! let mut registry = HandlerRegistry::new();
//! register_builtin_handlers(&mut registry);
//!
//! let engine = Engine::start(config, slot_a, slot_b, registry).await?;
//! println!("{}", engine.diagnostics().summary());
//! engine.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod command;
pub mod diagnostics;
pub mod directory;
pub mod echo;
pub mod engine;
pub mod error;
pub mod handler;
pub mod health;
pub mod lifecycle;
pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod reply;
pub mod router;
pub mod status;
pub mod throttle;
pub mod transmit;

pub use classifier::Classifier;
pub use command::ParsedCommand;
pub use diagnostics::{Diagnostics, DiagnosticsReport};
pub use directory::{NodeDirectory, OwnNodeIds};
pub use echo::{EchoStats, EchoSuppressor};
pub use engine::{AdapterSlot, Engine, EngineHandle};
pub use error::{EngineError, HandlerError, Result};
pub use handler::{
    register_builtin_handlers, CommandHandler, CommandInfo, CommandRequest, HandlerRegistry,
    HandlerResult, StatusHandler,
};
pub use health::{Backoff, HealthSupervisor};
pub use normalizer::{normalize, InboundEvent, NormalizedPacket};
pub use orchestrator::{Mode, Orchestrator, SlotOutcome, StartupStage};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineStats};
pub use reply::{ReplyOptions, ReplySink};
pub use router::{RouteOutcome, Router, RouterStats};
pub use status::{AdapterReport, AdapterStatus};
pub use throttle::{SenderThrottle, ThrottleKey};
pub use transmit::{chunk_utf8, OutboundTarget, Transmitter};
