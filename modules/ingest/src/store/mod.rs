//! Durable mirror and dead-letter storage.
//!
//! Both stores are append-only. The mirror enforces exactly-once effect via
//! a uniqueness constraint on `idempotency_key`; the dead-letter store keeps
//! every failure occurrence, duplicates included. Implementations are
//! swapped by config (`STORE_TYPE`): Postgres in production, in-memory for
//! dev and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One mirrored event as returned by queries. `envelope` is the full wire
/// envelope; `created_at` is insertion time, the query sort key.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorRecord {
    pub id: i64,
    pub topic: String,
    pub envelope: Value,
    pub created_at: DateTime<Utc>,
}

/// Mirror query filters. `cursor` is the `id` of the last record from the
/// previous page; results are insertion-order ascending.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub topic: Option<String>,
    pub kind: Option<String>,
    pub trace_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor: Option<i64>,
    pub limit: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            topic: None,
            kind: None,
            trace_id: None,
            since: None,
            until: None,
            cursor: None,
            limit: 100,
        }
    }
}

/// One page of mirror results. `next_cursor` is present when another page
/// may exist; pass it back as `cursor` to resume.
#[derive(Debug, Serialize)]
pub struct MirrorPage {
    pub events: Vec<MirrorRecord>,
    pub next_cursor: Option<i64>,
}

/// Append-only, idempotent store of every accepted event.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Insert an accepted envelope. Returns `false` (not an error) when a
    /// record with the same `idempotency_key` already exists.
    async fn insert(&self, topic: &str, envelope: &EventEnvelope) -> Result<bool, StoreError>;

    /// Query mirrored events, insertion-order ascending, paginated.
    async fn query(&self, filter: &EventFilter) -> Result<MirrorPage, StoreError>;

    /// Whether a record with this idempotency key has been mirrored.
    /// Used by dead-letter recovery to confirm a replay landed.
    async fn contains_key(&self, idempotency_key: &str) -> Result<bool, StoreError>;
}

/// One dead-lettered event with its failure context.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub original_topic: String,
    pub failure_reason: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DlqFilter {
    pub topic: Option<String>,
    pub limit: i64,
}

impl Default for DlqFilter {
    fn default() -> Self {
        Self {
            topic: None,
            limit: 50,
        }
    }
}

/// Append-only record of events the pipeline could not handle.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Record a failure. Never dedups.
    async fn record(
        &self,
        original_topic: &str,
        payload: Value,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// List dead letters, newest first.
    async fn list(&self, filter: &DlqFilter) -> Result<Vec<DeadLetter>, StoreError>;

    /// Remove an entry; called only after a replay has been confirmed in
    /// the mirror.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}
