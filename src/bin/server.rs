//! Headless lark server binary.
//!
//! Wires the memory store, guard, scheduler, and status surface together
//! and runs until interrupted. The telephony transport connects sessions
//! into the orchestrator out-of-process; this binary owns everything that
//! must outlive any single call.

use lark::scheduler::{CallAttemptResult, CallLauncher, CallScheduler, OutboundCall};
use lark::session::SessionRegistry;
use lark::LarkConfig;
use lark_guard::GuardHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Placeholder launcher until the telephony transport registers its own.
///
/// Reports every attempt as failed so scheduled calls back off and
/// eventually abandon instead of silently vanishing.
struct NoTransportLauncher;

#[async_trait::async_trait]
impl CallLauncher for NoTransportLauncher {
    async fn launch(&self, call: &OutboundCall) -> CallAttemptResult {
        tracing::warn!(id = %call.id, "no telephony transport registered");
        CallAttemptResult::Failed("no transport registered".to_owned())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("lark.toml"), PathBuf::from);
    let config = if config_path.exists() {
        LarkConfig::from_file(&config_path)?
    } else {
        tracing::info!(path = %config_path.display(), "no config file, using defaults");
        LarkConfig::default()
    };

    let guard = GuardHandle::new(config.guard.to_breaker_config());
    let registry = SessionRegistry::new();
    let store = Arc::new(lark::MemoryStore::open(&config.memory)?);
    tracing::info!(root = %store.root().display(), "memory store open");

    // The orchestrator instance handed to the telephony transport when it
    // connects a call into a session.
    let orchestrator = lark::TurnOrchestrator::new(
        config.clone(),
        Arc::clone(&store),
        Arc::new(lark::HttpEmbedder::new(&config.embedding)),
        Arc::new(lark::HttpGuidanceAnalyzer::new(&config.guidance)),
        guard.clone(),
    );
    orchestrator.health_check()?;

    let shutdown = CancellationToken::new();

    let scheduler = CallScheduler::new(&config.scheduler, Arc::new(NoTransportLauncher));
    let scheduler_handle = scheduler.spawn(shutdown.clone());

    let status_handle = tokio::spawn(lark::status::serve(
        config.status.bind_addr.clone(),
        guard.clone(),
        registry.clone(),
        shutdown.clone(),
    ));

    tracing::info!("lark server running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();

    let _ = scheduler_handle.await;
    if let Ok(Err(e)) = status_handle.await {
        tracing::error!(error = %e, "status surface exited with error");
    }

    Ok(())
}
