//! Engine facade
//!
//! [`Engine::start`] brings up both networks, resolves the bridge mode and
//! spawns the tasks:
//!
//! ```text
//! AdapterTask(A) ─┐                          ┌─▶ handler ─▶ ReplySink ─▶ Transmitter
//!                 ├─▶ inbound queue ─▶ Pipeline ─▶ Router ─┤
//! AdapterTask(B) ─┘                          └─▶ handler ...
//!        ▲                                                        │
//!        └────────────────── outbound queues ◀────────────────────┘
//!
//! HealthSupervisor (own interval)
//! ```
//!
//! A network that fails to connect at startup still gets its adapter task.
//! It starts disconnected and reconnects with backoff; the startup mode
//! does not change when it comes up later.
//!
//! [`Engine::shutdown`] is cooperative: running handlers get the first half
//! of the grace period, adapters are then told to stop and flush, and
//! whatever is still running at the deadline is aborted.

use std::sync::Arc;
use std::time::Instant;

use meshgate_core::{format_node_id, MeshgateConfig, NetworkSource};
use meshgate_transport::{TransportAdapter, TransportError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::classifier::Classifier;
use crate::diagnostics::{Diagnostics, DiagnosticsReport};
use crate::directory::{NodeDirectory, OwnNodeIds};
use crate::echo::EchoSuppressor;
use crate::error::{EngineError, Result};
use crate::handler::{HandlerRegistry, StatusHandler};
use crate::health::HealthSupervisor;
use crate::lifecycle::AdapterTask;
use crate::orchestrator::{Mode, Orchestrator, SlotOutcome, StartupStage};
use crate::pipeline::Pipeline;
use crate::router::Router;
use crate::status::AdapterStatus;
use crate::transmit::{OutboundTarget, Transmitter};

/// What the caller hands the engine for one network
pub enum AdapterSlot {
    /// Network not enabled
    Disabled,
    /// Adapter built and ready to connect
    Ready(Box<dyn TransportAdapter>),
    /// Adapter could not be built
    Failed(TransportError),
}

impl AdapterSlot {
    /// Slot from a `build_adapter` result
    pub fn from_build(
        enabled: bool,
        built: std::result::Result<Box<dyn TransportAdapter>, TransportError>,
    ) -> Self {
        match (enabled, built) {
            (false, _) => AdapterSlot::Disabled,
            (true, Ok(adapter)) => AdapterSlot::Ready(adapter),
            (true, Err(e)) => AdapterSlot::Failed(e),
        }
    }
}

impl std::fmt::Debug for AdapterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterSlot::Disabled => write!(f, "Disabled"),
            AdapterSlot::Ready(adapter) => write!(f, "Ready({})", adapter.name()),
            AdapterSlot::Failed(e) => write!(f, "Failed({})", e),
        }
    }
}

/// Connect and handshake one adapter
///
/// The adapter is handed back on connect and handshake failures too, so its
/// task can keep retrying.
async fn bring_up(
    source: NetworkSource,
    slot: AdapterSlot,
    status: &AdapterStatus,
    own_ids: &OwnNodeIds,
) -> (SlotOutcome, Option<Box<dyn TransportAdapter>>) {
    let failed = |stage: StartupStage, e: &TransportError| {
        error!(source = %source, stage = %stage, code = e.error_code(), error = %e, "Network failed to start");
        status.mark_startup_failed(format!("{} failed: {}", stage, e));
        SlotOutcome::Failed {
            stage,
            error: e.to_string(),
        }
    };

    let mut adapter = match slot {
        AdapterSlot::Disabled => {
            info!(source = %source, "Network disabled");
            return (SlotOutcome::Disabled, None);
        }
        AdapterSlot::Failed(e) => return (failed(StartupStage::Construction, &e), None),
        AdapterSlot::Ready(adapter) => adapter,
    };

    info!(source = %source, adapter = adapter.name(), "Connecting");
    if let Err(e) = adapter.connect().await {
        return (failed(StartupStage::Connect, &e), Some(adapter));
    }
    if let Err(e) = adapter.begin_session().await {
        let _ = adapter.disconnect().await;
        return (failed(StartupStage::ReadLoop, &e), Some(adapter));
    }

    let node_id = adapter.local_node_id();
    own_ids.learn(source, node_id);
    status.mark_active(adapter.name(), own_ids.get(source), Instant::now());
    info!(
        source = %source,
        adapter = adapter.name(),
        node = %own_ids.get(source).map(format_node_id).unwrap_or_else(|| "unknown".to_string()),
        "Network up"
    );
    (SlotOutcome::Up, Some(adapter))
}

/// Cloneable handle for querying and sending
#[derive(Debug, Clone)]
pub struct EngineHandle {
    orchestrator: Arc<Orchestrator>,
    diagnostics: Arc<Diagnostics>,
    transmitter: Arc<Transmitter>,
}

impl EngineHandle {
    /// Current mode
    pub fn mode(&self) -> Mode {
        self.orchestrator.current_mode()
    }

    /// Running dual as configured
    pub fn is_dual_mode_healthy(&self) -> bool {
        self.orchestrator.is_dual_mode_healthy()
    }

    /// Full diagnostics report
    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.diagnostics.report()
    }

    /// Broadcast text on a network
    pub async fn send_broadcast(&self, source: NetworkSource, channel: u8, text: &str) -> Result<usize> {
        self.transmitter
            .send_text(source, OutboundTarget::Broadcast { channel }, text)
            .await
    }

    /// Send text to one node
    pub async fn send_direct(&self, source: NetworkSource, node_id: u32, text: &str) -> Result<usize> {
        self.transmitter
            .send_text(source, OutboundTarget::Direct { node_id }, text)
            .await
    }
}

/// The running bridge
pub struct Engine {
    config: MeshgateConfig,
    handle: EngineHandle,
    router: Arc<Router>,
    shutdown_tx: watch::Sender<bool>,
    adapter_tasks: Vec<(NetworkSource, JoinHandle<()>)>,
    pipeline_task: JoinHandle<()>,
    health_task: JoinHandle<()>,
}

impl Engine {
    /// Bring up the networks and start routing
    ///
    /// Fails with [`EngineError::AllTransportsFailed`] when no network came
    /// up.
    pub async fn start(
        config: MeshgateConfig,
        network_a: AdapterSlot,
        network_b: AdapterSlot,
        mut registry: HandlerRegistry,
    ) -> Result<Engine> {
        config.validate()?;
        info!(
            network_a = config.network_a.enabled,
            network_b = config.network_b.enabled,
            "Starting meshgate engine"
        );

        let own_ids = Arc::new(OwnNodeIds::new());
        for source in NetworkSource::ALL {
            if let Some(node_id) = config.network(source).and_then(|n| n.node_id) {
                own_ids.set_configured(source, node_id);
            }
        }

        let status_a = Arc::new(AdapterStatus::new(
            NetworkSource::NetworkA,
            config.network_a.enabled,
        ));
        let status_b = Arc::new(AdapterStatus::new(
            NetworkSource::NetworkB,
            config.network_b.enabled,
        ));

        let ((outcome_a, adapter_a), (outcome_b, adapter_b)) = tokio::join!(
            bring_up(NetworkSource::NetworkA, network_a, &status_a, &own_ids),
            bring_up(NetworkSource::NetworkB, network_b, &status_b, &own_ids),
        );

        let orchestrator = Arc::new(Orchestrator::new(config.is_dual_configured()));
        if orchestrator.resolve_startup(&outcome_a, &outcome_b) == Mode::Failed {
            return Err(EngineError::AllTransportsFailed(format!(
                "network_a: {:?}, network_b: {:?}",
                outcome_a, outcome_b
            )));
        }

        let echo = Arc::new(EchoSuppressor::from_config(&config.echo));
        let directory = Arc::new(NodeDirectory::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(config.pipeline.inbound_queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut transmitter = Transmitter::new(echo.clone());
        let mut tasks = Vec::new();
        for (adapter, status) in [(adapter_a, &status_a), (adapter_b, &status_b)] {
            let Some(adapter) = adapter else { continue };
            let (outbound_tx, outbound_rx) = mpsc::channel(config.pipeline.outbound_queue);
            transmitter.attach(adapter.source(), outbound_tx, adapter.max_text_len());
            tasks.push(AdapterTask::new(
                adapter,
                status.clone(),
                own_ids.clone(),
                inbound_tx.clone(),
                outbound_rx,
                shutdown_rx.clone(),
                config.reconnect.clone(),
            ));
        }
        // The pipeline ends once every adapter task has dropped its sender
        drop(inbound_tx);
        let transmitter = Arc::new(transmitter);

        let statuses = vec![status_a, status_b];
        let diagnostics = Arc::new(Diagnostics::new(
            orchestrator.clone(),
            statuses.clone(),
            echo.clone(),
            directory.clone(),
        ));
        if !registry.contains("status") {
            let diag = Arc::downgrade(&diagnostics);
            registry.register(
                "status",
                StatusHandler::new(Arc::new(move || match diag.upgrade() {
                    Some(diag) => diag.report().summary(),
                    None => "shutting down".to_string(),
                })),
            );
        }

        let router = Arc::new(Router::new(
            &config.router,
            registry,
            echo.clone(),
            transmitter.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Classifier::new(config.router.command_prefix),
            own_ids,
            directory,
            router.clone(),
        ));
        diagnostics.attach_pipeline(&pipeline);

        let adapter_tasks = tasks
            .into_iter()
            .map(|task| (task.source(), tokio::spawn(task.run())))
            .collect();
        let pipeline_task = tokio::spawn(pipeline.run(inbound_rx));
        let health_task = tokio::spawn(
            HealthSupervisor::new(&config.health, statuses, echo).run(shutdown_rx),
        );

        info!(mode = %orchestrator.current_mode(), "Engine running");

        Ok(Engine {
            handle: EngineHandle {
                orchestrator,
                diagnostics,
                transmitter,
            },
            config,
            router,
            shutdown_tx,
            adapter_tasks,
            pipeline_task,
            health_task,
        })
    }

    /// Handle for queries and sends
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.handle.mode()
    }

    /// Full diagnostics report
    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.handle.diagnostics()
    }

    /// Stop everything within the configured grace period
    ///
    /// Handlers may use at most half of it, so adapters always keep the
    /// rest to flush queued sends and disconnect.
    pub async fn shutdown(self) -> Result<()> {
        let grace = self.config.pipeline.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        info!(grace_ms = grace.as_millis() as u64, "Shutting down engine");

        let handlers_done = self.router.drain(grace / 2).await;
        let _ = self.shutdown_tx.send(true);

        let mut clean = handlers_done;
        for (source, mut task) in self.adapter_tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!(source = %source, "Adapter did not stop in time, aborting");
                task.abort();
                clean = false;
            }
        }

        let mut pipeline_task = self.pipeline_task;
        if tokio::time::timeout_at(deadline, &mut pipeline_task).await.is_err() {
            warn!("Pipeline did not stop in time, aborting");
            pipeline_task.abort();
            clean = false;
        }

        let mut health_task = self.health_task;
        if tokio::time::timeout_at(deadline, &mut health_task).await.is_err() {
            health_task.abort();
        }

        if clean {
            info!("Engine stopped");
            Ok(())
        } else {
            Err(EngineError::ShutdownTimeout {
                duration_ms: grace.as_millis() as u64,
            })
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mode", &self.mode())
            .field("adapters", &self.adapter_tasks.len())
            .finish_non_exhaustive()
    }
}
