use async_trait::async_trait;

use super::errors::StoreError;
use crate::domain::models::{RunQuery, RunRecord, SpecFingerprint};

/// Persistence collaborator keyed by spec fingerprint.
///
/// Records are append-only: `put` never overwrites an earlier run of the same
/// fingerprint, and `get` returns the most recent one.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Most recent record stored under `fingerprint`.
    async fn get(&self, fingerprint: &SpecFingerprint) -> Result<Option<RunRecord>, StoreError>;

    /// Store `record` under `fingerprint`.
    async fn put(&self, fingerprint: &SpecFingerprint, record: RunRecord) -> Result<(), StoreError>;

    /// Records matching `query`, newest first, truncated to `query.limit`.
    async fn query(&self, query: &RunQuery) -> Result<Vec<RunRecord>, StoreError>;
}
