//! Request logging and Prometheus exposition.

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

use crate::api::AppState;

/// Id of the account that passed bearer authentication, attached to the
/// response so the request log can name the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedCaller(pub i32);

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus_handle.as_ref().map_or_else(
        || "Metrics not enabled".to_string(),
        metrics_exporter_prometheus::PrometheusHandle::render,
    )
}

/// Coarse result class used as a log field. Credential failures get their
/// own bucket so they can be alerted on apart from other client errors.
fn classify(status: StatusCode) -> &'static str {
    match status {
        s if s.is_server_error() => "error",
        StatusCode::UNAUTHORIZED => "unauthorized",
        s if s.is_client_error() => "client_error",
        _ => "success",
    }
}

pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |mp| mp.as_str().to_string());

    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %method,
        route = %route,
        user_id = tracing::field::Empty,
    );

    async move {
        let response = next.run(req).await;
        let status = response.status();

        if let Some(AuthenticatedCaller(id)) = response.extensions().get::<AuthenticatedCaller>() {
            Span::current().record("user_id", id);
        }

        let labels = [
            ("method", method.to_string()),
            ("path", route),
            ("status", status.as_u16().to_string()),
        ];
        metrics::counter!("http_requests_total", &labels).increment(1);
        metrics::histogram!("http_request_duration_seconds", &labels)
            .record(start.elapsed().as_secs_f64());

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = classify(status);

        if outcome == "error" {
            warn!(status_code = status.as_u16(), duration_ms, outcome, "Request failed");
        } else {
            info!(status_code = status.as_u16(), duration_ms, outcome, "Request finished");
        }

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_their_own_class() {
        assert_eq!(classify(StatusCode::OK), "success");
        assert_eq!(classify(StatusCode::CREATED), "success");
        assert_eq!(classify(StatusCode::UNAUTHORIZED), "unauthorized");
        assert_eq!(classify(StatusCode::BAD_REQUEST), "client_error");
        assert_eq!(classify(StatusCode::UNPROCESSABLE_ENTITY), "client_error");
        assert_eq!(classify(StatusCode::SERVICE_UNAVAILABLE), "error");
    }
}
