//! Dead-letter inspection and replay endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::replay::{recover, ReplayFilter};
use crate::store::DlqFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub topic: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /api/v1/dlq` — list dead-lettered events, newest first.
pub async fn get_dlq_events(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let filter = DlqFilter {
        topic: query.topic,
        limit: query.limit.unwrap_or(50).clamp(1, 500),
    };

    match state.dlq.list(&filter).await {
        Ok(entries) => Ok(Json(json!({
            "dlq_events": entries,
            "count": entries.len(),
        }))),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch DLQ events");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch DLQ events".to_string(),
            ))
        }
    }
}

/// `POST /api/v1/dlq/replay` — republish dead-lettered events and delete
/// each entry only once it is confirmed back in the mirror.
pub async fn replay_dlq_events(
    State(state): State<AppState>,
    Json(filter): Json<ReplayFilter>,
) -> Result<Json<Value>, (StatusCode, String)> {
    match recover(
        &filter,
        state.bus.as_ref(),
        state.mirror.as_ref(),
        state.dlq.as_ref(),
        state.replay_confirm_timeout,
    )
    .await
    {
        Ok(report) => Ok(Json(json!({
            "attempted": report.attempted,
            "recovered": report.recovered,
            "skipped": report.skipped,
        }))),
        Err(e) => {
            tracing::error!(error = %e, "DLQ replay failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "DLQ replay failed".to_string(),
            ))
        }
    }
}
