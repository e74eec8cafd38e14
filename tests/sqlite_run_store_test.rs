//! SQLite run store against a database file on disk.

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use simroute::adapters::sqlite::{create_pool, SqliteRunStore};
use simroute::domain::models::DatabaseConfig;
use simroute::services::Fingerprinter;
use simroute::{ConvergenceStatus, RunId, RunQuery, RunRecord, RunStore, SpecFingerprint};

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("data").join("runs.db").display())
}

async fn open(url: &str) -> SqliteRunStore {
    let config = DatabaseConfig {
        url: url.to_string(),
        ..DatabaseConfig::default()
    };
    let pool = create_pool(&config).await.expect("pool");
    SqliteRunStore::connect(pool).await.expect("schema")
}

fn record_for(spec: Value, estimate: f64) -> (SpecFingerprint, RunRecord) {
    let fingerprint = Fingerprinter::default().fingerprint(&spec).unwrap();
    let record = RunRecord {
        run_id: RunId::new(),
        fingerprint: fingerprint.clone(),
        spec,
        estimate,
        uncertainty_pcm: 62.5,
        particles: 40_000,
        batches: 200,
        convergence: Some(ConvergenceStatus::Converged),
        iterations: Some(2),
        created_at: Utc::now(),
    };
    (fingerprint, record)
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);

    let (fingerprint, record) = record_for(json!({"geometry": "pin", "pitch": 1.26}), 1.0312);
    {
        let store = open(&url).await;
        store.put(&fingerprint, record.clone()).await.unwrap();
    }

    let reopened = open(&url).await;
    let found = reopened.get(&fingerprint).await.unwrap().expect("stored run");
    assert_eq!(found.run_id, record.run_id);
    assert_eq!(found.fingerprint, fingerprint);
    assert_eq!(found.spec, record.spec);
    assert_eq!(found.particles, 40_000);
    assert_eq!(found.batches, 200);
    assert_eq!(found.iterations, Some(2));
    assert!((found.estimate - 1.0312).abs() < 1e-12);
}

#[tokio::test]
async fn test_equivalent_specs_share_a_fingerprint() {
    let dir = TempDir::new().unwrap();
    let store = open(&database_url(&dir)).await;

    let (fingerprint, record) = record_for(json!({"pitch": 1.26, "geometry": "pin"}), 1.01);
    store.put(&fingerprint, record.clone()).await.unwrap();

    let same = Fingerprinter::default()
        .fingerprint(&json!({"geometry": "pin", "pitch": 1.260}))
        .unwrap();
    let found = store.get(&same).await.unwrap().expect("lookup by equivalent spec");
    assert_eq!(found.run_id, record.run_id);
}

#[tokio::test]
async fn test_query_spec_filter_and_limit() {
    let dir = TempDir::new().unwrap();
    let store = open(&database_url(&dir)).await;

    for enrichment in [3.0, 4.5, 4.5, 5.0] {
        let (fingerprint, record) =
            record_for(json!({"fuel": {"enrichment": enrichment}, "seed": RunId::new().to_string()}), 1.0);
        store.put(&fingerprint, record).await.unwrap();
    }

    let mut query = RunQuery::default();
    query
        .spec_filters
        .insert("fuel.enrichment".to_string(), json!(4.5));
    assert_eq!(store.query(&query).await.unwrap().len(), 2);

    query.limit = Some(1);
    assert_eq!(store.query(&query).await.unwrap().len(), 1);

    let everything = store.query(&RunQuery::default()).await.unwrap();
    assert_eq!(everything.len(), 4);
    assert!(everything
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));
}
