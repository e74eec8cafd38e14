//! SQLite implementation of the RunStore port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::domain::models::{ConvergenceStatus, RunId, RunQuery, RunRecord, SpecFingerprint};
use crate::domain::ports::{RunStore, StoreError};

const SCHEMA: [&str; 2] = [
    r"
CREATE TABLE IF NOT EXISTS runs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    fingerprint TEXT NOT NULL,
    spec TEXT NOT NULL,
    estimate REAL NOT NULL,
    uncertainty_pcm REAL NOT NULL,
    particles INTEGER NOT NULL,
    batches INTEGER NOT NULL,
    convergence TEXT,
    iterations INTEGER,
    created_at TEXT NOT NULL
)",
    "CREATE INDEX IF NOT EXISTS idx_runs_fingerprint ON runs (fingerprint, seq)",
];

const COLUMNS: &str = "run_id, fingerprint, spec, estimate, uncertainty_pcm, particles, batches, convergence, iterations, created_at";

/// SQLite-backed run store. Rows are append-only; `seq` orders them.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    fingerprint: String,
    spec: String,
    estimate: f64,
    uncertainty_pcm: f64,
    particles: i64,
    batches: i64,
    convergence: Option<String>,
    iterations: Option<i64>,
    created_at: String,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Wrap `pool` and create the schema if missing.
    pub async fn connect(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("schema setup failed: {e}")))?;
        }
        Ok(())
    }

    fn row_to_record(row: RunRow) -> Result<RunRecord, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRecord {
            run_id: row.run_id.clone(),
            reason,
        };
        let run_id: RunId = row
            .run_id
            .parse()
            .map_err(|e| corrupt(format!("bad run id: {e}")))?;
        let spec = serde_json::from_str(&row.spec).map_err(|e| corrupt(format!("bad spec: {e}")))?;
        let convergence = row
            .convergence
            .as_deref()
            .map(str::parse::<ConvergenceStatus>)
            .transpose()
            .map_err(corrupt)?;
        let particles = u64::try_from(row.particles)
            .map_err(|_| corrupt(format!("negative particles {}", row.particles)))?;
        let batches = u32::try_from(row.batches)
            .map_err(|_| corrupt(format!("batches {} out of range", row.batches)))?;
        let iterations = row
            .iterations
            .map(u32::try_from)
            .transpose()
            .map_err(|_| corrupt("iterations out of range".to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(RunRecord {
            run_id,
            fingerprint: SpecFingerprint::from_hex(row.fingerprint),
            spec,
            estimate: row.estimate,
            uncertainty_pcm: row.uncertainty_pcm,
            particles,
            batches,
            convergence,
            iterations,
            created_at,
        })
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn get(&self, fingerprint: &SpecFingerprint) -> Result<Option<RunRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM runs WHERE fingerprint = ? ORDER BY seq DESC LIMIT 1");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.map(Self::row_to_record).transpose()
    }

    async fn put(&self, fingerprint: &SpecFingerprint, record: RunRecord) -> Result<(), StoreError> {
        let spec = serde_json::to_string(&record.spec)?;
        let particles = i64::try_from(record.particles)
            .map_err(|_| StoreError::QueryFailed(format!("particles {} too large", record.particles)))?;

        sqlx::query(
            r"
            INSERT INTO runs (run_id, fingerprint, spec, estimate, uncertainty_pcm, particles, batches, convergence, iterations, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(record.run_id.to_string())
        .bind(fingerprint.as_str())
        .bind(spec)
        .bind(record.estimate)
        .bind(record.uncertainty_pcm)
        .bind(particles)
        .bind(i64::from(record.batches))
        .bind(record.convergence.map(ConvergenceStatus::as_str))
        .bind(record.iterations.map(i64::from))
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        tracing::debug!(run_id = %record.run_id, fingerprint = %fingerprint.short(), "run stored");
        Ok(())
    }

    async fn query(&self, query: &RunQuery) -> Result<Vec<RunRecord>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM runs WHERE 1=1"));

        if !query.run_ids.is_empty() {
            builder.push(" AND run_id IN (");
            let mut ids = builder.separated(", ");
            for id in &query.run_ids {
                ids.push_bind(id.to_string());
            }
            ids.push_unseparated(")");
        }
        if let Some(ref fingerprint) = query.fingerprint {
            builder.push(" AND fingerprint = ").push_bind(fingerprint.as_str().to_string());
        }
        if let Some(status) = query.convergence {
            builder.push(" AND convergence = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY seq DESC");

        // Spec filters use numeric-equivalent JSON comparison, so they are
        // applied after loading and the limit with them.
        let sql_limit = query.limit.filter(|_| query.spec_filters.is_empty());
        if let Some(limit) = sql_limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows: Vec<RunRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = Self::row_to_record(row)?;
            if query.matches(&record) {
                records.push(record);
            }
        }
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
