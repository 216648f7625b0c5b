//! Meshgate Node - dual-network mesh radio command bot
//!
//! This binary runs the bridge with:
//! - Up to two radio networks (Meshtastic-style and MeshCore-style)
//! - Built-in commands (`echo`, `ping`, `help`, `status`)
//! - REST API for health and diagnostics

mod server;

use anyhow::Context;
use clap::Parser;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meshgate_core::{MeshgateConfig, NetworkSource};
use meshgate_engine::{register_builtin_handlers, AdapterSlot, Engine, EngineHandle, HandlerRegistry};
use meshgate_transport::build_adapter;

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG_PATH: &str = "meshgate.toml";

#[derive(Parser)]
#[command(name = "meshgate-node")]
#[command(about = "Dual-network mesh radio command bot")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Status HTTP server port (0 = auto-assign)
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Application state shared across handlers
pub struct AppState {
    /// Engine handle for queries
    pub engine: EngineHandle,
    /// Process start time
    pub start_time: Instant,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(args.config.as_deref())?;
    for source in NetworkSource::ALL {
        if let Some(network) = config.network(source).filter(|n| n.enabled) {
            info!(source = %source, link = %network.link.endpoint(), "Network configured");
        }
    }

    let slot_a = AdapterSlot::from_build(
        config.network_a.enabled,
        build_adapter(NetworkSource::NetworkA, &config.network_a),
    );
    let slot_b = AdapterSlot::from_build(
        config.network_b.enabled,
        build_adapter(NetworkSource::NetworkB, &config.network_b),
    );

    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry);

    let engine = match Engine::start(config, slot_a, slot_b, registry).await {
        Ok(engine) => engine,
        Err(e) => {
            error!(code = e.error_code(), "Engine failed to start: {}", e);
            return Err(e).context("no radio network could be started");
        }
    };

    let state = Arc::new(AppState {
        engine: engine.handle(),
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    // Start HTTP server - bind to requested port (0 = auto-assign)
    let http_bind_addr = format!("0.0.0.0:{}", args.http_port);
    let listener = tokio::net::TcpListener::bind(&http_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_bind_addr))?;
    let actual_http_port = listener.local_addr()?.port();

    info!("═══════════════════════════════════════════════════════════");
    info!("  Meshgate running in {} mode", engine.mode());
    info!("  Health:  http://127.0.0.1:{}/health", actual_http_port);
    info!("  Status:  http://127.0.0.1:{}/api/status", actual_http_port);
    info!("═══════════════════════════════════════════════════════════");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let app = server::create_router(state);
    let http_task = tokio::spawn(async move {
        let stopped = async move {
            let _ = stop_rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(stopped)
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");

    let _ = stop_tx.send(true);
    if let Err(e) = engine.shutdown().await {
        warn!(code = e.error_code(), "Shutdown was not clean: {}", e);
    }
    let _ = http_task.await;

    info!("Goodbye");
    Ok(())
}

/// Load the config file, or fall back to defaults when none is present
fn load_config(path: Option<&Path>) -> anyhow::Result<MeshgateConfig> {
    if let Some(path) = path {
        info!("Loading config from {}", path.display());
        return MeshgateConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        info!("Loading config from {}", DEFAULT_CONFIG_PATH);
        return MeshgateConfig::load(default_path)
            .with_context(|| format!("failed to load config {}", DEFAULT_CONFIG_PATH));
    }

    info!("No config file found, using defaults");
    let config = MeshgateConfig::default();
    config.validate()?;
    Ok(config)
}
