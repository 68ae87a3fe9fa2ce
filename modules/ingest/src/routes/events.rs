//! Producer publish endpoint and mirror query endpoint.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::store::EventFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Defaults to `tracker.events.api.{kind}`.
    pub topic: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub trace_id: Option<Uuid>,
}

/// `POST /api/v1/events` — accept an event for processing.
///
/// 202 means "accepted", not "persisted"; persistence status is
/// discoverable through the mirror and DLQ query endpoints.
pub async fn publish_event(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> (StatusCode, Json<Value>) {
    if req.kind.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "kind must be non-empty"})),
        );
    }

    let topic = req
        .topic
        .unwrap_or_else(|| format!("tracker.events.api.{}", req.kind));

    let trace_id = state
        .publisher
        .publish(&topic, &req.kind, req.payload, req.trace_id)
        .await;

    (StatusCode::ACCEPTED, Json(json!({ "trace_id": trace_id })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
    pub kind: Option<String>,
    pub trace_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/v1/events` — query the durable mirror, insertion-order
/// ascending, cursor-paginated.
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let filter = EventFilter {
        topic: query.topic,
        kind: query.kind,
        trace_id: query.trace_id,
        since: query.since,
        until: query.until,
        cursor: query.cursor,
        limit: query.limit.unwrap_or(100).clamp(1, 500),
    };

    match state.mirror.query(&filter).await {
        Ok(page) => Ok(Json(json!({
            "events": page.events,
            "count": page.events.len(),
            "next_cursor": page.next_cursor,
        }))),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch events");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch events".to_string(),
            ))
        }
    }
}
