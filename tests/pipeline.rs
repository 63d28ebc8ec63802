//! End-to-end producer tests against a temporary SQLite store with a
//! deterministic mock embedding provider, so every pipeline path runs
//! without network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use vector_mill::config::Config;
use vector_mill::embedding::Embedder;
use vector_mill::error::PipelineError;
use vector_mill::index_client::{DocumentIndex, IndexDocument};
use vector_mill::models::{ContentEvent, Origin};
use vector_mill::producer_event::{handle_event, EventOutcome};
use vector_mill::producer_harvest::run_harvest;
use vector_mill::producer_poll::run_poll_cycle;
use vector_mill::store::Store;
use vector_mill::{db, migrate};

const DIMS: usize = 8;

/// Deterministic embedder: the vector is derived from a hash of the text,
/// so identical text embeds identically and different text does not.
struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        digest
            .chunks_exact(4)
            .map(|chunk| {
                let n = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                n as f32 / u32::MAX as f32
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedding-v1"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector_for(text))
    }
}

/// Succeeds for the first `budget` calls, then fails transiently — used to
/// simulate a provider outage mid-batch.
struct FlakyEmbedder {
    budget: usize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedding-v1"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.budget {
            Ok(MockEmbedder::vector_for(text))
        } else {
            Err(PipelineError::ProviderUnavailable(
                "simulated outage".to_string(),
            ))
        }
    }
}

/// In-memory document index.
struct FakeIndex {
    documents: Mutex<HashMap<String, Vec<IndexDocument>>>,
}

impl FakeIndex {
    fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    fn put(&self, index: &str, id: &str, score: f64, source: serde_json::Value) {
        let mut documents = self.documents.lock().unwrap();
        let docs = documents.entry(index.to_string()).or_default();
        docs.retain(|d| d.id != id);
        docs.push(IndexDocument {
            id: id.to_string(),
            score,
            source,
        });
    }
}

#[async_trait]
impl DocumentIndex for FakeIndex {
    async fn indices(&self) -> Result<Vec<String>, PipelineError> {
        let mut names: Vec<String> = self.documents.lock().unwrap().keys().cloned().collect();
        names.push(".internal".to_string());
        names.sort();
        Ok(names)
    }

    async fn documents_since(
        &self,
        index: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IndexDocument>, PipelineError> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default())
    }
}

async fn setup() -> (TempDir, Config, Store) {
    let tmp = TempDir::new().unwrap();

    let mut config = Config::default();
    config.db.path = tmp.path().join("data/vmill.sqlite");
    config.harvest.staging_dir = tmp.path().join("staging");
    std::fs::create_dir_all(&config.harvest.staging_dir).unwrap();

    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    (tmp, config, Store::new(pool))
}

fn created_event(record_id: i64, content: &str) -> ContentEvent {
    ContentEvent {
        record_id,
        created: true,
        is_approved: false,
        platform: Some("Instagram".to_string()),
        theme: Some("Digital marketing".to_string()),
        content: content.to_string(),
        created_at: None,
        updated_at: None,
    }
}

fn update_event(record_id: i64, content: &str, is_approved: bool) -> ContentEvent {
    ContentEvent {
        created: false,
        is_approved,
        ..created_event(record_id, content)
    }
}

fn staging_payload(contents: &[(&str, &str, &str)]) -> String {
    let units: Vec<serde_json::Value> = contents
        .iter()
        .map(|(site, status, content)| {
            serde_json::json!({
                "site_name": site,
                "site_url": format!("https://{}.example", site),
                "url": format!("https://{}.example/post", site),
                "category": "BLOG",
                "status": status,
                "scraped_at": "2024-06-01T08:00:00Z",
                "content": content,
            })
        })
        .collect();
    serde_json::to_string(&units).unwrap()
}

// ---- event-triggered producer ----

#[tokio::test]
async fn event_producer_is_idempotent() {
    let (_tmp, _config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let event = created_event(1, "A fresh post about winter campaigns");

    let first = handle_event(&store, &embedder, &event).await.unwrap();
    assert!(matches!(first, EventOutcome::Embedded { .. }));

    let second = handle_event(&store, &embedder, &event).await.unwrap();
    assert_eq!(second, EventOutcome::AlreadyEmbedded { refreshed: false });

    let records = store.list(Some(Origin::UserGenerated), None, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    // The provider was paid exactly once.
    assert_eq!(embedder.call_count(), 1);
}

#[tokio::test]
async fn unapproved_update_is_skipped() {
    let (_tmp, _config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let event = update_event(2, "Draft content under review", false);
    let outcome = handle_event(&store, &embedder, &event).await.unwrap();
    assert_eq!(outcome, EventOutcome::SkippedUnapproved);
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn empty_content_is_never_embedded() {
    let (_tmp, _config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let event = created_event(3, "   ");
    let outcome = handle_event(&store, &embedder, &event).await.unwrap();
    assert_eq!(outcome, EventOutcome::SkippedEmpty);
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn approved_update_supersedes_previous_record() {
    let (_tmp, _config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let original = created_event(4, "Original announcement text");
    handle_event(&store, &embedder, &original).await.unwrap();

    let revised = update_event(4, "Revised announcement text", true);
    let outcome = handle_event(&store, &embedder, &revised).await.unwrap();
    let EventOutcome::Embedded { record_id: new_id, superseded } = outcome else {
        panic!("expected a new record");
    };
    assert_eq!(superseded, 1);

    let records = store.list(Some(Origin::UserGenerated), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);

    let old = records
        .iter()
        .find(|r| r.content == "Original announcement text")
        .unwrap();
    assert_eq!(old.metadata["superseded_by"], new_id);

    let new = records
        .iter()
        .find(|r| r.content == "Revised announcement text")
        .unwrap();
    assert!(new.metadata.get("superseded_by").is_none());
}

#[tokio::test]
async fn reapproval_refreshes_title_without_a_new_vector() {
    let (_tmp, _config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let original = created_event(5, "Stable content");
    handle_event(&store, &embedder, &original).await.unwrap();

    // Same content redelivered as an approved update: metadata refresh only.
    let reapproved = update_event(5, "Stable content", true);
    let outcome = handle_event(&store, &embedder, &reapproved).await.unwrap();
    assert_eq!(outcome, EventOutcome::AlreadyEmbedded { refreshed: true });
    assert_eq!(embedder.call_count(), 1);

    let records = store.list(Some(Origin::UserGenerated), None, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata["is_approved"], true);
}

// ---- batch-file producer ----

#[tokio::test]
async fn harvest_chunks_units_and_retires_the_file() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    // 1400 chars with max 1000 / overlap 100 must become exactly two chunks.
    let long_post: String = (0..1400)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    let file = config.harvest.staging_dir.join("harvest_20240601.json");
    std::fs::write(
        &file,
        staging_payload(&[
            ("marketing-blog", "success", long_post.as_str()),
            ("broken-site", "error", "unreachable"),
        ]),
    )
    .unwrap();

    let report = run_harvest(&config, &store, &embedder).await.unwrap();
    assert_eq!(report.files_seen, 1);
    assert_eq!(report.files_retired, 1);
    assert_eq!(report.chunks_embedded, 2);
    assert_eq!(report.units_processed, 1);
    assert_eq!(report.units_quarantined, 1);

    // Retired from staging, with the failed unit quarantined for review.
    assert!(!file.exists());
    let quarantine = config
        .harvest
        .staging_dir
        .join("quarantine/harvest_20240601.rejected.json");
    assert!(quarantine.exists());
    let quarantined: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&quarantine).unwrap()).unwrap();
    assert_eq!(quarantined[0]["unit"]["site_name"], "broken-site");

    let records = store.list(Some(Origin::WebHarvest), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);

    let chunk0 = records
        .iter()
        .find(|r| r.metadata["chunk_index"] == 0)
        .unwrap();
    let chunk1 = records
        .iter()
        .find(|r| r.metadata["chunk_index"] == 1)
        .unwrap();
    assert_eq!(chunk0.content, long_post[0..1000]);
    assert_eq!(chunk1.content, long_post[900..1400]);
    assert_eq!(chunk0.metadata["total_chunks"], 2);
    assert_eq!(chunk0.metadata["site_name"], "marketing-blog");
    assert_eq!(chunk0.title.as_deref(), Some("marketing-blog (1/2)"));
    assert!(chunk0.metadata["processed_at"].is_string());
}

#[tokio::test]
async fn harvest_keeps_the_file_on_partial_failure_and_retry_completes() {
    let (_tmp, config, store) = setup().await;

    let long_post: String = (0..1400)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    let file = config.harvest.staging_dir.join("harvest_outage.json");
    std::fs::write(
        &file,
        staging_payload(&[("marketing-blog", "success", long_post.as_str())]),
    )
    .unwrap();

    // Provider dies after the first chunk: the staged file must survive.
    let flaky = FlakyEmbedder::new(1);
    let report = run_harvest(&config, &store, &flaky).await.unwrap();
    assert_eq!(report.files_kept, 1);
    assert_eq!(report.files_retired, 0);
    assert_eq!(report.chunks_embedded, 1);
    assert!(file.exists());

    // Retry with a healthy provider: completes without re-embedding the
    // chunk that already landed.
    let embedder = MockEmbedder::new();
    let report = run_harvest(&config, &store, &embedder).await.unwrap();
    assert_eq!(report.files_retired, 1);
    assert_eq!(report.chunks_embedded, 1);
    assert_eq!(report.chunks_deduplicated, 1);
    assert_eq!(embedder.call_count(), 1);
    assert!(!file.exists());

    let records = store.list(Some(Origin::WebHarvest), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn identical_harvest_units_yield_a_single_record() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let file = config.harvest.staging_dir.join("harvest_dupes.json");
    std::fs::write(
        &file,
        staging_payload(&[
            ("marketing-blog", "success", "The same promo text"),
            ("marketing-blog", "success", "The same promo text"),
        ]),
    )
    .unwrap();

    let report = run_harvest(&config, &store, &embedder).await.unwrap();
    assert_eq!(report.chunks_embedded, 1);
    assert_eq!(report.chunks_deduplicated, 1);

    let records = store.list(Some(Origin::WebHarvest), None, 10).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn unparseable_staging_file_is_quarantined() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let file = config.harvest.staging_dir.join("harvest_garbled.json");
    std::fs::write(&file, "{ not json").unwrap();

    let report = run_harvest(&config, &store, &embedder).await.unwrap();
    assert_eq!(report.files_quarantined, 1);
    assert!(!file.exists());
    assert!(config
        .harvest
        .staging_dir
        .join("quarantine/harvest_garbled.json")
        .exists());
}

// ---- incremental-poll producer ----

#[tokio::test]
async fn poll_cycle_is_idempotent_and_advances_the_watermark() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let index = FakeIndex::new();
    index.put(
        "crm",
        "doc-1",
        1.5,
        serde_json::json!({ "message": "Quarterly revenue crossed the target" }),
    );
    index.put(
        "crm",
        "doc-2",
        0.7,
        serde_json::json!({ "description": "Support backlog cleared this sprint" }),
    );

    let report = run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();
    assert_eq!(report.indices_discovered, 1); // .internal filtered out
    assert_eq!(report.embedded, 2);

    let first_watermark = store.watermark("crm").await.unwrap().unwrap();
    assert!(store.watermark(".internal").await.unwrap().is_none());

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // Nothing changed: the watermark still advances, no new records appear.
    let report = run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();
    assert_eq!(report.embedded, 0);
    assert_eq!(report.deduplicated, 2);

    let second_watermark = store.watermark("crm").await.unwrap().unwrap();
    assert!(second_watermark > first_watermark);

    let records = store.list(Some(Origin::ExternalIndex), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(embedder.call_count(), 2);
}

#[tokio::test]
async fn score_churn_does_not_trigger_reembedding() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let index = FakeIndex::new();
    let source = serde_json::json!({ "message": "Stable document body text" });
    index.put("crm", "doc-1", 1.0, source.clone());
    run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();

    // Only the relevance score moves; the body is unchanged.
    index.put("crm", "doc-1", 9.9, source);
    let report = run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();
    assert_eq!(report.embedded, 0);
    assert_eq!(report.deduplicated, 1);
    assert_eq!(embedder.call_count(), 1);
}

#[tokio::test]
async fn content_change_creates_a_new_record_and_supersedes_the_old() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    let index = FakeIndex::new();
    index.put(
        "crm",
        "doc-1",
        1.0,
        serde_json::json!({ "message": "First revision of the playbook" }),
    );
    run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();

    index.put(
        "crm",
        "doc-1",
        1.0,
        serde_json::json!({ "message": "Second revision of the playbook" }),
    );
    let report = run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();
    assert_eq!(report.embedded, 1);
    assert_eq!(report.superseded, 1);

    let records = store.list(Some(Origin::ExternalIndex), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);

    let old = records
        .iter()
        .find(|r| r.content.contains("First revision"))
        .unwrap();
    assert!(old.metadata["superseded_by"].is_string());

    let new = records
        .iter()
        .find(|r| r.content.contains("Second revision"))
        .unwrap();
    assert!(new.metadata.get("superseded_by").is_none());
    assert_eq!(new.metadata["document_id"], "doc-1");
}

#[tokio::test]
async fn transient_failure_leaves_the_watermark_untouched() {
    let (_tmp, config, store) = setup().await;

    let index = FakeIndex::new();
    index.put(
        "crm",
        "doc-1",
        1.0,
        serde_json::json!({ "message": "Document one body content" }),
    );
    index.put(
        "crm",
        "doc-2",
        1.0,
        serde_json::json!({ "message": "Document two body content" }),
    );

    // Outage after the first document: the index must not advance.
    let flaky = FlakyEmbedder::new(1);
    let report = run_poll_cycle(&config, &store, &flaky, &index).await.unwrap();
    assert_eq!(report.indices_failed, 1);
    assert_eq!(report.indices_completed, 0);
    assert!(store.watermark("crm").await.unwrap().is_none());

    // Recovery: the re-run picks up where dedup says it left off.
    let embedder = MockEmbedder::new();
    let report = run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();
    assert_eq!(report.indices_completed, 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.deduplicated, 1);
    assert!(store.watermark("crm").await.unwrap().is_some());

    let records = store.list(Some(Origin::ExternalIndex), None, 10).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn producers_write_to_disjoint_origin_partitions() {
    let (_tmp, config, store) = setup().await;
    let embedder = MockEmbedder::new();

    handle_event(&store, &embedder, &created_event(10, "Event content"))
        .await
        .unwrap();

    let file = config.harvest.staging_dir.join("harvest_mixed.json");
    std::fs::write(
        &file,
        staging_payload(&[("site", "success", "Harvested content")]),
    )
    .unwrap();
    run_harvest(&config, &store, &embedder).await.unwrap();

    let index = FakeIndex::new();
    index.put(
        "crm",
        "doc-1",
        1.0,
        serde_json::json!({ "message": "Indexed document content" }),
    );
    run_poll_cycle(&config, &store, &embedder, &index).await.unwrap();

    for origin in Origin::ALL {
        let records = store.list(Some(origin), None, 10).await.unwrap();
        assert_eq!(records.len(), 1, "one record expected for {}", origin);
        assert_eq!(records[0].origin, origin);
        assert_eq!(records[0].dims, DIMS);
        assert_eq!(records[0].model, "mock-embedding-v1");
    }
}
