//! In-memory implementation of the mirror and dead-letter stores for tests
//! and local development without Postgres.

use super::{
    DeadLetter, DeadLetterStore, DlqFilter, EventFilter, MirrorPage, MirrorRecord, MirrorStore,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    mirror: Vec<MirrorRecord>,
    keys: HashSet<String>,
    dlq: Vec<DeadLetter>,
    next_mirror_id: i64,
    next_dlq_id: i64,
}

/// Both stores behind one lock. The key set is updated under the same lock
/// as the append, so concurrent duplicate inserts resolve to a single row
/// just like the Postgres uniqueness constraint.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn insert(&self, topic: &str, envelope: &EventEnvelope) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(envelope)?;

        let mut inner = self.inner.lock().expect("store lock poisoned");
        if !inner.keys.insert(envelope.idempotency_key.clone()) {
            return Ok(false);
        }
        inner.next_mirror_id += 1;
        let id = inner.next_mirror_id;
        inner.mirror.push(MirrorRecord {
            id,
            topic: topic.to_string(),
            envelope: payload,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn query(&self, filter: &EventFilter) -> Result<MirrorPage, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let limit = filter.limit.max(1) as usize;

        let events: Vec<MirrorRecord> = inner
            .mirror
            .iter()
            .filter(|r| filter.cursor.is_none_or(|c| r.id > c))
            .filter(|r| filter.topic.as_ref().is_none_or(|t| &r.topic == t))
            .filter(|r| {
                filter
                    .kind
                    .as_ref()
                    .is_none_or(|k| r.envelope.get("kind").and_then(Value::as_str) == Some(k))
            })
            .filter(|r| {
                filter.trace_id.is_none_or(|t| {
                    r.envelope.get("trace_id").and_then(Value::as_str)
                        == Some(t.to_string().as_str())
                })
            })
            .filter(|r| filter.since.is_none_or(|s| r.created_at >= s))
            .filter(|r| filter.until.is_none_or(|u| r.created_at <= u))
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = if events.len() == limit {
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
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.keys.contains(idempotency_key))
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn record(
        &self,
        original_topic: &str,
        payload: Value,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_dlq_id += 1;
        let id = inner.next_dlq_id;
        inner.dlq.push(DeadLetter {
            id,
            original_topic: original_topic.to_string(),
            failure_reason: reason.to_string(),
            payload,
            created_at: failed_at,
        });
        Ok(())
    }

    async fn list(&self, filter: &DlqFilter) -> Result<Vec<DeadLetter>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .dlq
            .iter()
            .rev() // newest first
            .filter(|d| filter.topic.as_ref().is_none_or(|t| &d.original_topic == t))
            .take(filter.limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.dlq.retain(|d| d.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str) -> EventEnvelope {
        EventEnvelope::new(kind, json!({"n": 1}))
    }

    #[tokio::test]
    async fn test_duplicate_key_inserts_once() {
        let store = MemoryStore::new();
        let event = envelope("project_created");

        assert!(store.insert("tracker.events.projects", &event).await.unwrap());
        assert!(!store.insert("tracker.events.projects", &event).await.unwrap());

        let page = store.query(&EventFilter::default()).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert!(store.contains_key(&event.idempotency_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_by_kind_and_topic() {
        let store = MemoryStore::new();
        store
            .insert("tracker.events.projects", &envelope("project_created"))
            .await
            .unwrap();
        store
            .insert("tracker.events.tasks", &envelope("task_done"))
            .await
            .unwrap();

        let page = store
            .query(&EventFilter {
                kind: Some("task_done".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].topic, "tracker.events.tasks");

        let page = store
            .query(&EventFilter {
                topic: Some("tracker.events.projects".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn test_query_filters_by_trace_id() {
        let store = MemoryStore::new();
        let event = envelope("project_created");
        let trace_id = event.trace_id;
        store.insert("tracker.events.projects", &event).await.unwrap();
        store
            .insert("tracker.events.projects", &envelope("project_created"))
            .await
            .unwrap();

        let page = store
            .query(&EventFilter {
                trace_id: Some(trace_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn test_pagination_is_restartable_and_ascending() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store
                .insert("tracker.events.seq", &envelope("tick"))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .query(&EventFilter {
                    cursor,
                    limit: 2,
                    ..Default::default()
                })
                .await
                .unwrap();
            seen.extend(page.events.iter().map(|r| r.id));
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_dlq_appends_without_dedup_and_deletes() {
        let store = MemoryStore::new();
        let payload = json!({"broken": true});

        for _ in 0..2 {
            store
                .record("tracker.events.bad", payload.clone(), "validation failed: kind", Utc::now())
                .await
                .unwrap();
        }

        let entries = store.list(&DlqFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 2, "duplicate failures are both recorded");

        store.delete(entries[0].id).await.unwrap();
        let entries = store.list(&DlqFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_dlq_list_is_newest_first_and_filtered() {
        let store = MemoryStore::new();
        store
            .record("tracker.events.a", json!({}), "first", Utc::now())
            .await
            .unwrap();
        store
            .record("tracker.events.b", json!({}), "second", Utc::now())
            .await
            .unwrap();

        let entries = store.list(&DlqFilter::default()).await.unwrap();
        assert_eq!(entries[0].failure_reason, "second");

        let entries = store
            .list(&DlqFilter {
                topic: Some("tracker.events.a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].failure_reason, "first");
    }
}
