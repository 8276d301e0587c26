//! Operational status surface.
//!
//! A small HTTP listener for monitoring: `/healthz` for liveness probes and
//! `/status` for circuit-breaker states and the active-session count.
//! Read-only — nothing here mutates orchestration state.

use crate::error::Result;
use crate::session::SessionRegistry;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use lark_guard::{GuardHandle, ServiceHealthSnapshot};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state behind the status handlers.
#[derive(Clone)]
pub struct StatusState {
    guard: GuardHandle,
    registry: SessionRegistry,
}

/// Point-in-time operational snapshot.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    /// Number of currently active call sessions.
    pub active_sessions: usize,
    /// Per-service circuit breaker health.
    pub circuits: Vec<ServiceHealthSnapshot>,
}

/// Build the current snapshot.
#[must_use]
pub fn snapshot(guard: &GuardHandle, registry: &SessionRegistry) -> StatusSnapshot {
    StatusSnapshot {
        active_sessions: registry.active_count(),
        circuits: guard.health_report(),
    }
}

/// Build the status router.
#[must_use]
pub fn status_router(guard: GuardHandle, registry: SessionRegistry) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(StatusState { guard, registry })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<StatusState>) -> Json<StatusSnapshot> {
    Json(snapshot(&state.guard, &state.registry))
}

/// Serve the status surface until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    bind_addr: String,
    guard: GuardHandle,
    registry: SessionRegistry,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| crate::error::CallError::Status(format!("bind {bind_addr} failed: {e}")))?;
    info!(%bind_addr, "status surface listening");

    axum::serve(listener, status_router(guard, registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| crate::error::CallError::Status(e.to_string()))
}
