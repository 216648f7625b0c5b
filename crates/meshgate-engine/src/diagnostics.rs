//! Diagnostics and status queries
//!
//! [`Diagnostics`] gathers the mode, per-adapter health and routing
//! counters into one serialisable [`DiagnosticsReport`]. The same report
//! backs the HTTP status endpoint and the `status` command.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::NodeDirectory;
use crate::echo::{EchoStats, EchoSuppressor};
use crate::orchestrator::{Mode, Orchestrator};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::router::RouterStats;
use crate::status::{AdapterReport, AdapterStatus};

/// Point-in-time view of the bridge
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    /// Current mode
    pub mode: Mode,
    /// Both networks enabled in config
    pub configured_dual: bool,
    /// Running fewer networks than configured
    pub mismatch: bool,
    /// Human-readable mismatch warning
    pub mismatch_warning: Option<String>,
    /// Per-network status
    pub adapters: Vec<AdapterReport>,
    /// Router counters
    pub router: RouterStats,
    /// Pipeline counters
    pub pipeline: PipelineStats,
    /// Echo suppressor counters
    pub echo: EchoStats,
    /// Node names learned so far
    pub known_nodes: usize,
    /// When this report was taken
    pub generated_at: DateTime<Utc>,
}

impl DiagnosticsReport {
    /// Short multi-line text suitable for a radio reply
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("mode {}", self.mode)];

        for adapter in self.adapters.iter().filter(|a| a.configured) {
            let line = if adapter.active && adapter.connected {
                match adapter.last_event_age_secs {
                    Some(age) if !adapter.alive => {
                        format!("{}: up, silent {}s", adapter.source, age)
                    }
                    Some(age) => format!("{}: up, rx {}s ago", adapter.source, age),
                    None => format!("{}: up, no rx yet", adapter.source),
                }
            } else if adapter.active {
                format!(
                    "{}: reconnecting ({} tries)",
                    adapter.source, adapter.reconnect_attempts
                )
            } else {
                let reason = adapter
                    .startup_failure
                    .as_deref()
                    .or(adapter.last_error.as_deref())
                    .unwrap_or("stopped");
                format!("{}: DOWN ({})", adapter.source, reason)
            };
            lines.push(line);
        }

        lines.push(format!(
            "cmds {} ok, {} failed",
            self.router.dispatched, self.router.handler_failures
        ));
        if self.mismatch {
            lines.push("! dual mode degraded".to_string());
        }
        lines.join("\n")
    }
}

/// Builds diagnostics reports from live engine state
#[derive(Debug)]
pub struct Diagnostics {
    orchestrator: Arc<Orchestrator>,
    statuses: Vec<Arc<AdapterStatus>>,
    echo: Arc<EchoSuppressor>,
    directory: Arc<NodeDirectory>,
    // Weak: the pipeline's router may hold a handler that holds us
    pipeline: OnceLock<Weak<Pipeline>>,
}

impl Diagnostics {
    /// Create a diagnostics source
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        statuses: Vec<Arc<AdapterStatus>>,
        echo: Arc<EchoSuppressor>,
        directory: Arc<NodeDirectory>,
    ) -> Self {
        Self {
            orchestrator,
            statuses,
            echo,
            directory,
            pipeline: OnceLock::new(),
        }
    }

    /// Attach the pipeline whose counters are reported
    pub fn attach_pipeline(&self, pipeline: &Arc<Pipeline>) {
        let _ = self.pipeline.set(Arc::downgrade(pipeline));
    }

    /// Take a report
    pub fn report(&self) -> DiagnosticsReport {
        let now = Instant::now();
        let pipeline = self.pipeline.get().and_then(Weak::upgrade);

        DiagnosticsReport {
            mode: self.orchestrator.current_mode(),
            configured_dual: self.orchestrator.is_dual_configured(),
            mismatch: self.orchestrator.mismatch(),
            mismatch_warning: self.orchestrator.mismatch_warning(),
            adapters: self.statuses.iter().map(|s| s.report(now)).collect(),
            router: pipeline
                .as_ref()
                .map(|p| p.router().stats())
                .unwrap_or_default(),
            pipeline: pipeline.as_ref().map(|p| p.stats()).unwrap_or_default(),
            echo: self.echo.stats(),
            known_nodes: self.directory.len(),
            generated_at: Utc::now(),
        }
    }
}
