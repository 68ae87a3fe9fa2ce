//! Subscriber/Processor: drives inbound messages to the mirror or the DLQ.
//!
//! A dispatcher task consumes the subscription stream and hands each message
//! to one of a fixed pool of workers over bounded channels. The worker is
//! chosen by hashing the subject, so messages on one topic are handled in
//! broker order while distinct topics proceed concurrently. A worker never
//! propagates a per-message error; one bad event cannot stall the stream.

use event_bus::{validate_envelope, BusMessage, EventBus, EventEnvelope};
use futures::StreamExt;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::metrics::Metrics;
use crate::store::{DeadLetterStore, MirrorStore};

/// Subject all producers publish business events under.
pub const EVENTS_SUBJECT: &str = "tracker.events.>";

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Subject pattern to consume.
    pub subject: String,
    /// Worker pool size: the bound on concurrent message handling.
    pub workers: usize,
    /// Per-worker queue depth; the dispatcher blocks (backpressure) when a
    /// worker falls this far behind.
    pub queue_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            subject: EVENTS_SUBJECT.to_string(),
            workers: 4,
            queue_depth: 256,
        }
    }
}

/// Subscribe and start the processor. Returns the dispatcher handle; the
/// task exits once `shutdown` flips to `true` (or the stream ends) and all
/// workers have drained their queues. The caller bounds the drain with a
/// timeout.
pub async fn start_event_processor(
    bus: Arc<dyn EventBus>,
    mirror: Arc<dyn MirrorStore>,
    dlq: Arc<dyn DeadLetterStore>,
    metrics: Arc<Metrics>,
    config: ProcessorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> event_bus::BusResult<JoinHandle<()>> {
    let mut stream = bus.subscribe(&config.subject).await?;
    tracing::info!(subject = %config.subject, workers = config.workers, "event processor subscribed");

    let handle = tokio::spawn(async move {
        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = JoinSet::new();

        for index in 0..config.workers {
            let (tx, rx) = mpsc::channel::<BusMessage>(config.queue_depth);
            senders.push(tx);
            workers.spawn(worker_loop(
                index,
                rx,
                mirror.clone(),
                dlq.clone(),
                metrics.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown requested, stopping dispatch");
                        break;
                    }
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        tracing::warn!("subscription stream ended");
                        break;
                    };
                    let index = worker_index(&msg.subject, senders.len());
                    if senders[index].send(msg).await.is_err() {
                        tracing::error!(worker = index, "processor worker gone, dropping message");
                    }
                }
            }
        }

        // Closing the channels lets workers finish what is queued, then exit.
        drop(senders);
        while workers.join_next().await.is_some() {}
        tracing::info!("event processor stopped");
    });

    Ok(handle)
}

/// Same subject, same worker: preserves per-topic ordering.
fn worker_index(subject: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    subject.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::Receiver<BusMessage>,
    mirror: Arc<dyn MirrorStore>,
    dlq: Arc<dyn DeadLetterStore>,
    metrics: Arc<Metrics>,
) {
    while let Some(msg) = rx.recv().await {
        process_message(&msg, mirror.as_ref(), dlq.as_ref(), &metrics).await;
    }
    tracing::debug!(worker = index, "processor worker drained");
}

/// Decode → validate → idempotent mirror insert, dead-lettering at each
/// failure point. Infallible by design.
async fn process_message(
    msg: &BusMessage,
    mirror: &dyn MirrorStore,
    dlq: &dyn DeadLetterStore,
    metrics: &Metrics,
) {
    let raw: Value = match serde_json::from_slice(&msg.payload) {
        Ok(v) => v,
        Err(e) => {
            let payload = Value::String(String::from_utf8_lossy(&msg.payload).into_owned());
            dead_letter(
                dlq,
                metrics,
                &msg.subject,
                payload,
                format!("JSON decode error: {e}"),
                "decode",
            )
            .await;
            return;
        }
    };

    let errors = validate_envelope(&raw);
    if !errors.is_empty() {
        dead_letter(
            dlq,
            metrics,
            &msg.subject,
            raw,
            format!("validation failed: {}", errors.join("; ")),
            "validation",
        )
        .await;
        return;
    }

    // Validation guarantees the typed decode succeeds
    let envelope: EventEnvelope = match serde_json::from_value(raw.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            dead_letter(
                dlq,
                metrics,
                &msg.subject,
                raw,
                format!("validation failed: {e}"),
                "validation",
            )
            .await;
            return;
        }
    };

    let span = tracing::info_span!(
        "process_event",
        trace_id = %envelope.trace_id,
        subject = %msg.subject,
        kind = %envelope.kind,
    );

    async {
        match mirror.insert(&msg.subject, &envelope).await {
            Ok(inserted) => {
                if inserted {
                    tracing::debug!("event mirrored");
                } else {
                    tracing::info!(
                        idempotency_key = %envelope.idempotency_key,
                        "duplicate event ignored (already mirrored)"
                    );
                }
                metrics
                    .ingest_success_total
                    .with_label_values(&[msg.subject.as_str(), envelope.kind.as_str()])
                    .inc();
                metrics
                    .event_latency_seconds
                    .observe(msg.received_at.elapsed().as_secs_f64());
            }
            Err(e) => {
                tracing::error!(
                    idempotency_key = %envelope.idempotency_key,
                    error = %e,
                    "mirror insert failed"
                );
                dead_letter(
                    dlq,
                    metrics,
                    &msg.subject,
                    raw,
                    format!("processing error: {e}"),
                    "persistence",
                )
                .await;
            }
        }
    }
    .instrument(span)
    .await;
}

async fn dead_letter(
    dlq: &dyn DeadLetterStore,
    metrics: &Metrics,
    subject: &str,
    payload: Value,
    reason: String,
    reason_class: &str,
) {
    metrics
        .dlq_total
        .with_label_values(&[subject, reason_class])
        .inc();

    match dlq.record(subject, payload, &reason, chrono::Utc::now()).await {
        Ok(()) => {
            tracing::warn!(subject = %subject, reason = %reason, "event moved to DLQ");
        }
        Err(e) => {
            tracing::error!(
                subject = %subject,
                reason = %reason,
                dlq_error = %e,
                "failed to write to DLQ - event may be lost!"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_index_is_stable_and_bounded() {
        let workers = 4;
        let first = worker_index("tracker.events.projects", workers);
        for _ in 0..10 {
            assert_eq!(worker_index("tracker.events.projects", workers), first);
        }
        for subject in ["a", "a.b", "tracker.events.x", "tracker.events.y"] {
            assert!(worker_index(subject, workers) < workers);
        }
    }
}
