use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::arbiter::{Arbiter, ServiceStatus};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub services_online: usize,
    pub services_total: usize,
    /// Empty when no service is active.
    pub active_service: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(statuses: &[ServiceStatus]) -> HealthStatus {
    if statuses.iter().all(|s| s.online) {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    }
}

pub async fn health_report(arbiter: &Arbiter) -> HealthResponse {
    let statuses = arbiter.list_statuses().await;
    HealthResponse {
        status: aggregate_status(&statuses),
        services_online: statuses.iter().filter(|s| s.online).count(),
        services_total: statuses.len(),
        active_service: arbiter.active_service().await.unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /health` handler.  The arbiter answering at all is the liveness
/// signal, so this is 200 even when devices are offline.
pub async fn health_handler(State(arbiter): State<Arc<Arbiter>>) -> impl IntoResponse {
    (StatusCode::OK, Json(health_report(&arbiter).await))
}
