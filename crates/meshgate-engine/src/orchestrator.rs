//! Dual-mode orchestrator
//!
//! Decides, once at startup, which networks the bridge runs on:
//!
//! ```text
//! UNINITIALIZED ──both up──────────────▶ DUAL_ACTIVE
//!       │
//!       ├──one up, other failed/disabled─▶ SINGLE_ACTIVE(x)
//!       │
//!       └──none up──────────────────────▶ FAILED
//! ```
//!
//! When both networks are configured but only one came up, the bridge is
//! running degraded. That mismatch is recorded exactly once, logged as a
//! warning banner and exposed through diagnostics so it cannot be mistaken
//! for an intentional single-network setup.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use meshgate_core::NetworkSource;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

/// Operating mode of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Startup not resolved yet
    Uninitialized,
    /// Both networks running
    DualActive,
    /// Only one network running
    SingleActive(NetworkSource),
    /// No network could be started
    Failed,
}

impl Mode {
    /// Whether `source` is running in this mode
    pub fn is_active(&self, source: NetworkSource) -> bool {
        match self {
            Mode::DualActive => source != NetworkSource::Unknown,
            Mode::SingleActive(active) => *active == source,
            Mode::Uninitialized | Mode::Failed => false,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Uninitialized => write!(f, "UNINITIALIZED"),
            Mode::DualActive => write!(f, "DUAL_ACTIVE"),
            Mode::SingleActive(source) => write!(f, "SINGLE_ACTIVE({})", source),
            Mode::Failed => write!(f, "FAILED"),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where bringing up an adapter failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// The adapter could not be built from config
    Construction,
    /// The link could not be opened
    Connect,
    /// The handshake failed, so the read loop could not start
    ReadLoop,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupStage::Construction => write!(f, "construction"),
            StartupStage::Connect => write!(f, "connect"),
            StartupStage::ReadLoop => write!(f, "read loop start"),
        }
    }
}

/// Result of bringing up one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Not enabled in config
    Disabled,
    /// Connected and reading
    Up,
    /// Enabled but failed
    Failed {
        /// Failing stage
        stage: StartupStage,
        /// Error text
        error: String,
    },
}

impl SlotOutcome {
    fn is_up(&self) -> bool {
        matches!(self, SlotOutcome::Up)
    }
}

#[derive(Debug)]
struct OrchestratorState {
    mode: Mode,
    mismatch_warning: Option<String>,
}

/// Owns the bridge mode
#[derive(Debug)]
pub struct Orchestrator {
    configured_dual: bool,
    state: RwLock<OrchestratorState>,
    mismatch_warnings: AtomicU64,
}

impl Orchestrator {
    /// Create an orchestrator; `configured_dual` if both networks are enabled
    pub fn new(configured_dual: bool) -> Self {
        Self {
            configured_dual,
            state: RwLock::new(OrchestratorState {
                mode: Mode::Uninitialized,
                mismatch_warning: None,
            }),
            mismatch_warnings: AtomicU64::new(0),
        }
    }

    /// Resolve the startup mode from both networks' outcomes
    ///
    /// Only the first call has an effect; the mode is fixed for the life of
    /// the process.
    pub fn resolve_startup(&self, network_a: &SlotOutcome, network_b: &SlotOutcome) -> Mode {
        let mut state = self.state.write();
        if state.mode != Mode::Uninitialized {
            return state.mode;
        }

        let mode = match (network_a.is_up(), network_b.is_up()) {
            (true, true) => Mode::DualActive,
            (true, false) => Mode::SingleActive(NetworkSource::NetworkA),
            (false, true) => Mode::SingleActive(NetworkSource::NetworkB),
            (false, false) => Mode::Failed,
        };
        state.mode = mode;

        match mode {
            Mode::Failed => {
                error!(
                    network_a = ?network_a,
                    network_b = ?network_b,
                    "No network could be started"
                );
            }
            Mode::SingleActive(active) if self.configured_dual => {
                let (failed, outcome) = match active {
                    NetworkSource::NetworkA => (NetworkSource::NetworkB, network_b),
                    _ => (NetworkSource::NetworkA, network_a),
                };
                let reason = match outcome {
                    SlotOutcome::Failed { stage, error } => format!("{} failed: {}", stage, error),
                    other => format!("{:?}", other),
                };
                let warning = format!(
                    "Configured for dual mode but running {}: {} is down ({})",
                    mode, failed, reason
                );

                warn!("==============================================================");
                warn!("  DUAL MODE DEGRADED");
                warn!("  {}", warning);
                warn!("  Only {} traffic is being handled", active);
                warn!("==============================================================");

                state.mismatch_warning = Some(warning);
                self.mismatch_warnings.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                info!(mode = %mode, "Bridge mode resolved");
            }
        }
        mode
    }

    /// Current mode
    pub fn current_mode(&self) -> Mode {
        self.state.read().mode
    }

    /// Both networks are enabled in config
    pub fn is_dual_configured(&self) -> bool {
        self.configured_dual
    }

    /// Running dual as configured
    pub fn is_dual_mode_healthy(&self) -> bool {
        self.configured_dual && self.current_mode() == Mode::DualActive
    }

    /// Effective mode differs from configured mode
    pub fn mismatch(&self) -> bool {
        self.configured_dual && matches!(self.current_mode(), Mode::SingleActive(_))
    }

    /// Human-readable mismatch warning, if any
    pub fn mismatch_warning(&self) -> Option<String> {
        self.state.read().mismatch_warning.clone()
    }

    /// How many times the mismatch warning was recorded
    pub fn mismatch_warning_count(&self) -> u64 {
        self.mismatch_warnings.load(Ordering::Relaxed)
    }
}
