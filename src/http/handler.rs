//! Main axum router and HTTP request handlers for the arbiter API.
//!
//! Routes:
//! - `GET    /api/v1/status`                 - Active service plus all statuses
//! - `GET    /api/v1/services`               - All service statuses
//! - `GET    /api/v1/services/{name}`        - One service status
//! - `POST   /api/v1/services/{name}/activate` - Make a service the active one
//! - `POST   /api/v1/services/{name}/lock`   - Lock a service
//! - `DELETE /api/v1/services/{name}/lock`   - Unlock a service
//! - `POST   /api/v1/deactivate-all`         - Lock everything
//! - `GET    /health`                        - Health check
//! - `GET    /metrics`                       - Prometheus metrics
//! - `GET    /`                              - Status page

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument, warn};

use crate::arbiter::ArbiterError;
use crate::AppState;

const INDEX_HTML: &str = include_str!("index.html");

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Arbiter API
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/services", get(handle_list_services))
        .route("/api/v1/services/{name}", get(handle_get_service))
        .route("/api/v1/services/{name}/activate", post(handle_activate))
        .route(
            "/api/v1/services/{name}/lock",
            post(handle_lock).delete(handle_unlock),
        )
        .route("/api/v1/deactivate-all", post(handle_deactivate_all))
        // Health, metrics, UI
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/", get(handle_index))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/v1/status`
async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    let services = state.arbiter.list_statuses().await;
    let active = state.arbiter.active_service().await.unwrap_or_default();
    Json(json!({
        "active_service": active,
        "services": services,
    }))
    .into_response()
}

/// `GET /api/v1/services`
async fn handle_list_services(State(state): State<Arc<AppState>>) -> Response {
    Json(state.arbiter.list_statuses().await).into_response()
}

/// `GET /api/v1/services/{name}`
async fn handle_get_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let status = state.arbiter.status(&name).await?;
    Ok(Json(status).into_response())
}

/// `POST /api/v1/services/{name}/activate`
#[instrument(skip(state))]
async fn handle_activate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    state.arbiter.activate(&name).await?;
    Ok(Json(json!({
        "success": true,
        "active_service": name,
    }))
    .into_response())
}

/// `POST /api/v1/services/{name}/lock`
#[instrument(skip(state))]
async fn handle_lock(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    set_lock(&state, name, true).await
}

/// `DELETE /api/v1/services/{name}/lock`
#[instrument(skip(state))]
async fn handle_unlock(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    set_lock(&state, name, false).await
}

/// `POST /api/v1/deactivate-all`
#[instrument(skip(state))]
async fn handle_deactivate_all(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state.arbiter.deactivate_all().await?;
    Ok(Json(json!({
        "success": true,
        "active_service": "",
    }))
    .into_response())
}

/// `GET /health`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    crate::health::health_handler(State(Arc::clone(&state.arbiter))).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the arbiter.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state.metrics.encode()?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

/// `GET /`
async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

async fn set_lock(state: &AppState, name: String, locked: bool) -> Result<Response, AppError> {
    state.arbiter.set_lock(&name, locked).await?;
    Ok(Json(json!({
        "success": true,
        "service": name,
        "locked": locked,
    }))
    .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Handler error, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum AppError {
    /// Rejected or failed arbiter operation.
    Arbiter(ArbiterError),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Arbiter(err) => {
                let status = match err {
                    ArbiterError::NotFound(_) => StatusCode::NOT_FOUND,
                    ArbiterError::ServiceOffline(_) => StatusCode::CONFLICT,
                    ArbiterError::LockCallFailed { .. } | ArbiterError::PartialFailure { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                if status.is_server_error() {
                    warn!(error = %err, "arbiter operation failed");
                }
                (status, err.to_string())
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ArbiterError> for AppError {
    fn from(err: ArbiterError) -> Self {
        AppError::Arbiter(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
