//! System endpoints.

use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use super::{AppState, HealthResponse};

/// Liveness plus a database round trip.
///
/// # Endpoint
/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(e) => {
            tracing::warn!(
                uptime_secs = state.start_time.elapsed().as_secs(),
                "Health check failed: {e}"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}
