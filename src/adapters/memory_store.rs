//! In-memory run store for tests, demos and ephemeral sessions.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::models::{RunQuery, RunRecord, SpecFingerprint};
use crate::domain::ports::{RunStore, StoreError};

/// Append-only run log held in memory.
#[derive(Default)]
pub struct InMemoryRunStore {
    records: RwLock<Vec<RunRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`, oldest first.
    pub fn with_records(records: Vec<RunRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `put` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn get(&self, fingerprint: &SpecFingerprint) -> Result<Option<RunRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| &r.fingerprint == fingerprint)
            .cloned())
    }

    async fn put(&self, fingerprint: &SpecFingerprint, mut record: RunRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("writes disabled".to_string()));
        }
        record.fingerprint = fingerprint.clone();
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query(&self, query: &RunQuery) -> Result<Vec<RunRecord>, StoreError> {
        let records = self.records.read().await;
        let matching = records.iter().rev().filter(|r| query.matches(r)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RunId;
    use chrono::Utc;
    use serde_json::json;

    fn record(fingerprint: &SpecFingerprint, estimate: f64) -> RunRecord {
        RunRecord {
            run_id: RunId::new(),
            fingerprint: fingerprint.clone(),
            spec: json!({"fuel": "uo2"}),
            estimate,
            uncertainty_pcm: 40.0,
            particles: 10_000,
            batches: 100,
            convergence: None,
            iterations: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_returns_latest() {
        let store = InMemoryRunStore::new();
        let fp = SpecFingerprint::from_hex("0a".repeat(32));
        store.put(&fp, record(&fp, 1.0)).await.unwrap();
        store.put(&fp, record(&fp, 1.1)).await.unwrap();

        let latest = store.get(&fp).await.unwrap().unwrap();
        assert!((latest.estimate - 1.1).abs() < f64::EPSILON);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_query_newest_first_with_limit() {
        let store = InMemoryRunStore::new();
        let fp = SpecFingerprint::from_hex("0b".repeat(32));
        for estimate in [1.0, 1.1, 1.2] {
            store.put(&fp, record(&fp, estimate)).await.unwrap();
        }
        let query = RunQuery {
            limit: Some(2),
            ..RunQuery::default()
        };
        let found = store.query(&query).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!((found[0].estimate - 1.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryRunStore::new();
        let fp = SpecFingerprint::from_hex("0c".repeat(32));
        store.fail_writes(true);
        assert!(store.put(&fp, record(&fp, 1.0)).await.is_err());
        assert!(store.is_empty().await);
    }
}
