//! Liveness, readiness, and transport round-trip probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::time::Duration;

use event_bus::ConnectionState;

use crate::health::roundtrip_check;
use crate::AppState;

/// `GET /health/live` — process is up.
pub async fn liveness() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ingest-rs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health/ready` — transport connected and store reachable.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let bus_state = state.bus.state();
    let bus_ok = bus_state == ConnectionState::Connected;

    // Cheap keyed lookup doubles as a store connectivity probe.
    let store_ok = state.mirror.contains_key("__readiness__").await.is_ok();

    let status = if bus_ok && store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ready" } else { "not ready" },
            "bus": bus_state.to_string(),
            "store": if store_ok { "ok" } else { "unavailable" },
        })),
    )
}

/// `GET /api/v1/health/roundtrip` — publish-and-consume latency probe over
/// the live transport.
pub async fn roundtrip(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match roundtrip_check(state.bus.as_ref(), Duration::from_secs(5)).await {
        Ok(latency) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "latency_ms": latency.as_secs_f64() * 1000.0,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "failed",
                "error": e.to_string(),
            })),
        ),
    }
}
