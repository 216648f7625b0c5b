//! Inbound event pipeline
//!
//! The single consumer of the inbound queue. Events from both adapters are
//! processed strictly in arrival order per adapter; the interleaving between
//! adapters is whatever the queue delivers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::classifier::Classifier;
use crate::directory::{NodeDirectory, OwnNodeIds};
use crate::normalizer::{describe, normalize, InboundEvent};
use crate::router::{RouteOutcome, Router};

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Adapter could not decode the frame
    Garbled,
    /// Direct message from our own node to itself
    SelfDirectDropped,
    /// Handed to the router
    Routed(RouteOutcome),
}

/// Pipeline counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Events taken off the inbound queue
    pub events_received: u64,
    /// Undecodable frames
    pub garbled: u64,
    /// Self-addressed direct messages dropped before routing
    pub self_direct_dropped: u64,
    /// Packets handed to the router
    pub routed: u64,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    events_received: AtomicU64,
    garbled: AtomicU64,
    self_direct_dropped: AtomicU64,
    routed: AtomicU64,
}

/// Normalize, classify and route inbound events
#[derive(Debug)]
pub struct Pipeline {
    classifier: Classifier,
    own_ids: Arc<OwnNodeIds>,
    directory: Arc<NodeDirectory>,
    router: Arc<Router>,
    counters: PipelineCounters,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new(
        classifier: Classifier,
        own_ids: Arc<OwnNodeIds>,
        directory: Arc<NodeDirectory>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            classifier,
            own_ids,
            directory,
            router,
            counters: PipelineCounters::default(),
        }
    }

    /// Process one event
    pub async fn process(&self, inbound: InboundEvent) -> PipelineOutcome {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);

        if inbound.is_garbled() {
            self.counters.garbled.fetch_add(1, Ordering::Relaxed);
            let packet = normalize(&inbound).packet;
            warn!(
                source = %inbound.source,
                reason = packet.meta("garbled").and_then(|v| v.as_str()).unwrap_or("unknown"),
                "Dropping undecodable frame"
            );
            return PipelineOutcome::Garbled;
        }

        let normalized = normalize(&inbound);
        trace!(packet = %describe(&normalized.packet), "Normalized");
        self.directory.learn_from_packet(&normalized.packet);

        let classified = self
            .classifier
            .classify(normalized, &self.own_ids, &self.directory);

        if classified.is_self_direct() {
            self.counters.self_direct_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                source = %classified.source(),
                packet = %describe(&classified.packet),
                "Dropping direct message from our own node"
            );
            return PipelineOutcome::SelfDirectDropped;
        }

        self.counters.routed.fetch_add(1, Ordering::Relaxed);
        PipelineOutcome::Routed(self.router.route(classified).await)
    }

    /// Consume the inbound queue until every sender is gone
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundEvent>) {
        info!("Inbound pipeline started");
        while let Some(event) = inbound.recv().await {
            let outcome = self.process(event).await;
            trace!(outcome = ?outcome, "Event processed");
        }
        info!("Inbound pipeline stopped");
    }

    /// Router behind this pipeline
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Counter snapshot
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            events_received: self.counters.events_received.load(Ordering::Relaxed),
            garbled: self.counters.garbled.load(Ordering::Relaxed),
            self_direct_dropped: self.counters.self_direct_dropped.load(Ordering::Relaxed),
            routed: self.counters.routed.load(Ordering::Relaxed),
        }
    }
}
