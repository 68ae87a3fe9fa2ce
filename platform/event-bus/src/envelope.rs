//! # Event Envelope
//!
//! Wire-level structure every event on the bus must carry, plus the pure
//! validator the processor runs before anything touches storage.
//!
//! ## Envelope Fields
//!
//! - `trace_id`: UUID correlating causally-related events and requests
//! - `ts`: ISO 8601 UTC timestamp, stamped once at publish time
//! - `kind`: short event type name (e.g. `project_created`), used for
//!   routing and metrics labels
//! - `idempotency_key`: unique per logical occurrence; duplicate keys are
//!   persisted at most once regardless of redelivery
//! - `payload`: kind-specific body, opaque to the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Standard event envelope for everything moved through the pipeline.
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde_json::json;
///
/// let envelope = EventEnvelope::new("project_created", json!({"id": "p1"}));
/// assert_eq!(envelope.kind, "project_created");
/// assert!(envelope.idempotency_key.starts_with("project_created_"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Correlation id, generated here if the producer did not supply one
    pub trace_id: Uuid,

    /// Event creation time, UTC; never mutated after publish
    pub ts: DateTime<Utc>,

    /// Event type name, non-empty
    pub kind: String,

    /// Unique key per logical event instance
    pub idempotency_key: String,

    /// Kind-specific body
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Create a new envelope with generated `trace_id`, `ts`, and
    /// `idempotency_key` (`{kind}_{unix_millis}_{random suffix}`).
    pub fn new(kind: &str, payload: Value) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            trace_id: Uuid::new_v4(),
            ts: now,
            kind: kind.to_string(),
            idempotency_key: format!("{}_{}_{}", kind, now.timestamp_millis(), &suffix[..8]),
            payload,
        }
    }

    /// Keep a caller-supplied trace id instead of the generated one.
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }
}

/// Validate a decoded envelope against the wire contract.
///
/// Pure and deterministic; returns every problem found (empty = valid) so a
/// dead-lettered event names all of its defects at once.
///
/// # Validation Rules
///
/// - `trace_id`: present, parses as a UUID
/// - `ts`: present, parses as ISO 8601 / RFC 3339
/// - `kind`: present, non-empty string
/// - `idempotency_key`: present, non-empty string
/// - `payload`: optional, but must be an object when present
pub fn validate_envelope(raw: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    match raw.get("trace_id").and_then(|v| v.as_str()) {
        None => errors.push("missing required field: trace_id".to_string()),
        Some(s) => {
            if Uuid::parse_str(s).is_err() {
                errors.push(format!("invalid trace_id: must be a UUID, got '{s}'"));
            }
        }
    }

    match raw.get("ts").and_then(|v| v.as_str()) {
        None => errors.push("missing required field: ts".to_string()),
        Some(s) => {
            if DateTime::parse_from_rfc3339(s).is_err() {
                errors.push(format!("invalid ts: must be an ISO 8601 timestamp, got '{s}'"));
            }
        }
    }

    match raw.get("kind").and_then(|v| v.as_str()) {
        None => errors.push("missing required field: kind".to_string()),
        Some(s) => {
            if s.trim().is_empty() {
                errors.push("invalid kind: must be non-empty".to_string());
            }
        }
    }

    match raw.get("idempotency_key").and_then(|v| v.as_str()) {
        None => errors.push("missing required field: idempotency_key".to_string()),
        Some(s) => {
            if s.trim().is_empty() {
                errors.push("invalid idempotency_key: must be non-empty".to_string());
            }
        }
    }

    if let Some(payload) = raw.get("payload") {
        if !payload.is_object() {
            errors.push("invalid payload: must be an object".to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "trace_id": "550e8400-e29b-41d4-a716-446655440000",
            "ts": "2025-06-01T00:00:00Z",
            "kind": "project_created",
            "idempotency_key": "project_created_1748736000000_ab12cd34",
            "payload": {"id": "p1"}
        })
    }

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new("task_done", json!({"task": "t1"}));

        assert_eq!(envelope.kind, "task_done");
        assert!(envelope.idempotency_key.starts_with("task_done_"));
        // kind + millis + 8 hex chars, underscore separated
        let suffix = envelope.idempotency_key.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_envelope_keeps_supplied_trace_id() {
        let trace_id = Uuid::new_v4();
        let envelope = EventEnvelope::new("task_done", json!({})).with_trace_id(trace_id);
        assert_eq!(envelope.trace_id, trace_id);
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = EventEnvelope::new("project_created", json!({"id": "p1"}));
        let wire = serde_json::to_value(&envelope).unwrap();

        for field in ["trace_id", "ts", "kind", "idempotency_key", "payload"] {
            assert!(wire.get(field).is_some(), "missing wire field {field}");
        }
    }

    #[test]
    fn test_generated_envelope_validates() {
        let envelope = EventEnvelope::new("project_created", json!({"id": "p1"}));
        let wire = serde_json::to_value(&envelope).unwrap();
        assert!(validate_envelope(&wire).is_empty());
    }

    #[test]
    fn test_valid_envelope() {
        assert!(validate_envelope(&valid()).is_empty());
    }

    #[test]
    fn test_each_missing_field_is_named() {
        for field in ["trace_id", "ts", "kind", "idempotency_key"] {
            let mut raw = valid();
            raw.as_object_mut().unwrap().remove(field);

            let errors = validate_envelope(&raw);
            assert_eq!(errors.len(), 1, "expected one error for missing {field}");
            assert!(errors[0].contains(field), "error should name {field}: {}", errors[0]);
        }
    }

    #[test]
    fn test_all_errors_reported_at_once() {
        let errors = validate_envelope(&json!({}));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_invalid_trace_id() {
        let mut raw = valid();
        raw["trace_id"] = json!("not-a-uuid");
        let errors = validate_envelope(&raw);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("trace_id"));
    }

    #[test]
    fn test_invalid_ts() {
        let mut raw = valid();
        raw["ts"] = json!("yesterday");
        let errors = validate_envelope(&raw);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ts"));
    }

    #[test]
    fn test_empty_kind() {
        let mut raw = valid();
        raw["kind"] = json!("   ");
        let errors = validate_envelope(&raw);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("kind"));
    }

    #[test]
    fn test_non_object_payload() {
        let mut raw = valid();
        raw["payload"] = json!("not-an-object");
        let errors = validate_envelope(&raw);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("payload"));
    }

    #[test]
    fn test_missing_payload_is_allowed() {
        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("payload");
        assert!(validate_envelope(&raw).is_empty());
    }
}
