use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;

/// `GET /metrics` — Prometheus exposition.
pub async fn get_metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics".to_string(),
            )
        }
    }
}
