//! Operator-invoked dead-letter recovery.
//!
//! Re-attempts delivery for dead-lettered events and deletes an entry only
//! after the replayed event is confirmed in the durable mirror, so a replay
//! that fails anywhere along the way leaves the dead letter in place.

use event_bus::{validate_envelope, DeliveryGuarantee, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{DeadLetterStore, DlqFilter, MirrorStore, StoreError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayFilter {
    /// Restrict recovery to one original topic.
    pub topic: Option<String>,
    /// Maximum number of entries to attempt (newest first). Default 50.
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct RecoveryReport {
    pub attempted: usize,
    pub recovered: usize,
    pub skipped: usize,
}

/// Re-publish matching dead letters to their original topics.
///
/// Entries whose stored payload is not a valid envelope (e.g. they were
/// dead-lettered for a validation failure in the first place) are skipped —
/// replaying them would only bounce straight back.
pub async fn recover(
    filter: &ReplayFilter,
    bus: &dyn EventBus,
    mirror: &dyn MirrorStore,
    dlq: &dyn DeadLetterStore,
    confirm_timeout: Duration,
) -> Result<RecoveryReport, StoreError> {
    let entries = dlq
        .list(&DlqFilter {
            topic: filter.topic.clone(),
            limit: filter.limit.unwrap_or(50),
        })
        .await?;

    let mut report = RecoveryReport::default();

    for entry in entries {
        report.attempted += 1;

        let errors = validate_envelope(&entry.payload);
        if !errors.is_empty() {
            tracing::warn!(
                dlq_id = entry.id,
                topic = %entry.original_topic,
                errors = %errors.join("; "),
                "dead letter is not a replayable envelope, skipping"
            );
            report.skipped += 1;
            continue;
        }

        // validated above
        let key = entry
            .payload
            .get("idempotency_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let bytes = serde_json::to_vec(&entry.payload)?;
        if let Err(e) = bus
            .publish(&entry.original_topic, bytes, DeliveryGuarantee::BrokerAck)
            .await
        {
            tracing::warn!(
                dlq_id = entry.id,
                topic = %entry.original_topic,
                error = %e,
                "replay publish failed, keeping dead letter"
            );
            report.skipped += 1;
            continue;
        }

        if await_mirrored(mirror, &key, confirm_timeout).await? {
            dlq.delete(entry.id).await?;
            report.recovered += 1;
            tracing::info!(
                dlq_id = entry.id,
                topic = %entry.original_topic,
                idempotency_key = %key,
                "dead letter recovered into mirror"
            );
        } else {
            tracing::warn!(
                dlq_id = entry.id,
                topic = %entry.original_topic,
                idempotency_key = %key,
                "replayed event not confirmed in mirror, keeping dead letter"
            );
            report.skipped += 1;
        }
    }

    Ok(report)
}

async fn await_mirrored(
    mirror: &dyn MirrorStore,
    idempotency_key: &str,
    timeout: Duration,
) -> Result<bool, StoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        if mirror.contains_key(idempotency_key).await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
