//! Publisher: the producer-facing entry into the pipeline.
//!
//! Synthesizes the envelope, stamps trace and idempotency metadata, and
//! attempts delivery with bounded retries. Exhausted retries route the
//! envelope to the dead-letter store; the producer always gets the trace id
//! back and is never blocked on persistence.

use chrono::Utc;
use event_bus::{retry_with_backoff, DeliveryGuarantee, EventBus, EventEnvelope, RetryConfig};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::store::DeadLetterStore;

pub struct Publisher {
    bus: Arc<dyn EventBus>,
    dlq: Arc<dyn DeadLetterStore>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl Publisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        dlq: Arc<dyn DeadLetterStore>,
        metrics: Arc<Metrics>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            bus,
            dlq,
            metrics,
            retry,
        }
    }

    /// Publish an event. Returns the trace id in every case: success means
    /// "accepted for processing", and a delivery failure after all retries
    /// lands in the dead-letter store rather than surfacing to the caller.
    pub async fn publish(
        &self,
        topic: &str,
        kind: &str,
        payload: Value,
        trace_id: Option<Uuid>,
    ) -> Uuid {
        let mut envelope = EventEnvelope::new(kind, payload);
        if let Some(id) = trace_id {
            envelope = envelope.with_trace_id(id);
        }
        let trace_id = envelope.trace_id;

        self.metrics
            .ingest_total
            .with_label_values(&[topic, kind])
            .inc();

        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Value payloads always serialize; belt and braces
                self.dead_letter(topic, &envelope, &format!("serialization error: {e}"))
                    .await;
                return trace_id;
            }
        };

        let result = retry_with_backoff(
            || {
                let bytes = bytes.clone();
                async move {
                    self.bus
                        .publish(topic, bytes, DeliveryGuarantee::BrokerAck)
                        .await
                }
            },
            &self.retry,
            "publish_event",
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    trace_id = %trace_id,
                    topic = %topic,
                    kind = %kind,
                    "event published"
                );
            }
            Err(e) => {
                self.dead_letter(topic, &envelope, &format!("publish exhausted retries: {e}"))
                    .await;
            }
        }

        trace_id
    }

    async fn dead_letter(&self, topic: &str, envelope: &EventEnvelope, reason: &str) {
        self.metrics
            .dlq_total
            .with_label_values(&[topic, "publish"])
            .inc();

        let payload = match serde_json::to_value(envelope) {
            Ok(v) => v,
            Err(_) => Value::Null,
        };

        match self.dlq.record(topic, payload, reason, Utc::now()).await {
            Ok(()) => {
                tracing::warn!(
                    trace_id = %envelope.trace_id,
                    topic = %topic,
                    kind = %envelope.kind,
                    reason = %reason,
                    "event moved to DLQ after publish failure"
                );
            }
            Err(e) => {
                tracing::error!(
                    trace_id = %envelope.trace_id,
                    topic = %topic,
                    reason = %reason,
                    dlq_error = %e,
                    "failed to write to DLQ - event may be lost!"
                );
            }
        }
    }
}
