//! Postgres implementation of the mirror and dead-letter stores.
//!
//! Mirror inserts are single statements with `ON CONFLICT DO NOTHING` on the
//! idempotency key, so a write is all-or-nothing and duplicate redelivery is
//! a no-op rather than an error. The pool is sized by configuration,
//! independently of processor concurrency.

use super::{
    DeadLetter, DeadLetterStore, DlqFilter, EventFilter, MirrorPage, MirrorRecord, MirrorStore,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;
use serde_json::Value;
use sqlx::{FromRow, PgPool, QueryBuilder};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct MirrorRow {
    id: i64,
    topic: String,
    payload: Value,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DlqRow {
    id: i64,
    original_topic: String,
    failure_reason: String,
    payload: Value,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl MirrorStore for PgStore {
    async fn insert(&self, topic: &str, envelope: &EventEnvelope) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(envelope)?;

        let result = sqlx::query(
            r#"
            INSERT INTO events_mirror (topic, trace_id, kind, idempotency_key, ts, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(topic)
        .bind(envelope.trace_id)
        .bind(&envelope.kind)
        .bind(&envelope.idempotency_key)
        .bind(envelope.ts)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, filter: &EventFilter) -> Result<MirrorPage, StoreError> {
        let limit = filter.limit.max(1);
        let mut qb = QueryBuilder::new(
            "SELECT id, topic, payload, created_at FROM events_mirror WHERE TRUE",
        );

        if let Some(topic) = &filter.topic {
            qb.push(" AND topic = ").push_bind(topic);
        }
        if let Some(kind) = &filter.kind {
            qb.push(" AND kind = ").push_bind(kind);
        }
        if let Some(trace_id) = filter.trace_id {
            qb.push(" AND trace_id = ").push_bind(trace_id);
        }
        if let Some(since) = filter.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND created_at <= ").push_bind(until);
        }
        if let Some(cursor) = filter.cursor {
            qb.push(" AND id > ").push_bind(cursor);
        }
        qb.push(" ORDER BY id ASC LIMIT ").push_bind(limit);

        let rows: Vec<MirrorRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let events: Vec<MirrorRecord> = rows
            .into_iter()
            .map(|row| MirrorRecord {
                id: row.id,
                topic: row.topic,
                envelope: row.payload,
                created_at: row.created_at,
            })
            .collect();

        let next_cursor = if events.len() as i64 == limit {
            events.last().map(|r| r.id)
        } else {
            None
        };
        Ok(MirrorPage {
            events,
            next_cursor,
        })
    }

    async fn contains_key(&self, idempotency_key: &str) -> Result<bool, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM events_mirror WHERE idempotency_key = $1")
                .bind(idempotency_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }
}

#[async_trait]
impl DeadLetterStore for PgStore {
    async fn record(
        &self,
        original_topic: &str,
        payload: Value,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dlq_events (original_topic, failure_reason, payload, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(original_topic)
        .bind(reason)
        .bind(payload)
        .bind(failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, filter: &DlqFilter) -> Result<Vec<DeadLetter>, StoreError> {
        let mut qb = QueryBuilder::new(
            "SELECT id, original_topic, failure_reason, payload, created_at FROM dlq_events WHERE TRUE",
        );
        if let Some(topic) = &filter.topic {
            qb.push(" AND original_topic = ").push_bind(topic);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.max(1));

        let rows: Vec<DlqRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetter {
                id: row.id,
                original_topic: row.original_topic,
                failure_reason: row.failure_reason,
                payload: row.payload,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dlq_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
