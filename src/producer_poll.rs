//! Incremental-poll producer: sync the external document index.
//!
//! Per cycle, for every discoverable non-system index:
//!
//! ```text
//! read watermark -> query changed docs -> extract text -> dedup -> embed
//!   -> persist -> advance watermark
//! ```
//!
//! The watermark advance is the last step for an index, and records are
//! deduplicated by document fingerprint rather than watermark position, so
//! a crash anywhere mid-cycle makes the re-run a cheap no-op over whatever
//! already landed. Newly created indices are picked up automatically on the
//! next cycle; a transient failure aborts only the affected index, leaving
//! its watermark untouched while the others proceed.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::extract::extract_document_text;
use crate::fingerprint;
use crate::index_client::DocumentIndex;
use crate::models::{IndexMetadata, NewRecord, Origin};
use crate::store::{InsertOutcome, Store};

#[derive(Debug, Default)]
pub struct PollReport {
    pub indices_discovered: usize,
    pub indices_completed: usize,
    pub indices_failed: usize,
    pub documents_seen: usize,
    pub embedded: usize,
    pub deduplicated: usize,
    pub skipped_empty: usize,
    pub rejected: usize,
    pub superseded: u64,
}

/// Run one poll cycle across all discoverable indices.
pub async fn run_poll_cycle(
    config: &Config,
    store: &Store,
    embedder: &dyn Embedder,
    index: &dyn DocumentIndex,
) -> Result<PollReport> {
    // The watermark each index will advance to. Cycle start, not end, so
    // documents modified while we run are re-examined next cycle and
    // absorbed by dedup.
    let cycle_start = Utc::now();
    let mut report = PollReport::default();

    let names = index.indices().await?;

    for name in names {
        if name.starts_with('.') || name.starts_with('_') {
            debug!(index = %name, "skipping system index");
            continue;
        }
        report.indices_discovered += 1;

        let watermark = store.watermark(&name).await?;
        match watermark {
            Some(since) => debug!(index = %name, since = %since, "incremental fetch"),
            None => info!(index = %name, "first sync, fetching all documents"),
        }

        let documents = match index.documents_since(&name, watermark).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(index = %name, error = %e, "index fetch failed, watermark preserved");
                report.indices_failed += 1;
                continue;
            }
        };

        report.documents_seen += documents.len();

        let mut index_failed = false;

        for doc in documents {
            let text = extract_document_text(&doc.source, config.poll.max_text_chars);
            if text.trim().is_empty() {
                debug!(index = %name, document_id = %doc.id, "document has no textual content");
                report.skipped_empty += 1;
                continue;
            }

            let fp = fingerprint::external_index(&name, &doc.id, &text);
            if store.fingerprint_exists(Origin::ExternalIndex, &fp).await? {
                // Same body as last time — score or metadata churn alone
                // never triggers re-embedding.
                report.deduplicated += 1;
                continue;
            }

            let vector = match embedder.embed(&text).await {
                Ok(vector) => vector,
                Err(e) if e.is_transient() => {
                    warn!(index = %name, document_id = %doc.id, error = %e, "transient embed failure, aborting index");
                    index_failed = true;
                    break;
                }
                Err(e) => {
                    warn!(index = %name, document_id = %doc.id, error = %e, "document rejected");
                    report.rejected += 1;
                    continue;
                }
            };

            let metadata = IndexMetadata {
                index_name: name.clone(),
                document_id: doc.id.clone(),
                document_score: doc.score,
                source_fields: doc
                    .source
                    .as_object()
                    .map(|map| map.keys().cloned().collect())
                    .unwrap_or_default(),
                text_length: text.chars().count(),
                processed_at: Utc::now().to_rfc3339(),
                superseded_by: None,
                superseded_at: None,
                extra: serde_json::Map::new(),
            };

            let insert = store
                .insert_record(NewRecord {
                    origin: Origin::ExternalIndex,
                    fingerprint: fp,
                    content: text,
                    title: Some(format!("{}: {}", name, doc.id)),
                    model: embedder.model_name().to_string(),
                    vector,
                    metadata: serde_json::to_value(&metadata)
                        .map_err(|e| PipelineError::Validation(e.to_string()))?,
                })
                .await;

            match insert {
                Ok(InsertOutcome::Inserted(id)) => {
                    report.embedded += 1;
                    report.superseded += store
                        .supersede_index_document(&name, &doc.id, &id)
                        .await?;
                }
                Ok(InsertOutcome::Duplicate) => report.deduplicated += 1,
                Err(e) if e.is_transient() => {
                    warn!(index = %name, document_id = %doc.id, error = %e, "store failure, aborting index");
                    index_failed = true;
                    break;
                }
                Err(e) => {
                    warn!(index = %name, document_id = %doc.id, error = %e, "document rejected at persist");
                    report.rejected += 1;
                }
            }
        }

        if index_failed {
            report.indices_failed += 1;
        } else {
            store.set_watermark(&name, cycle_start).await?;
            report.indices_completed += 1;
        }
    }

    info!(
        indices = report.indices_discovered,
        completed = report.indices_completed,
        documents = report.documents_seen,
        embedded = report.embedded,
        deduplicated = report.deduplicated,
        "poll cycle complete"
    );

    Ok(report)
}

/// Run poll cycles on a fixed interval until interrupted.
pub async fn run_poll_loop(
    config: &Config,
    store: &Store,
    embedder: &dyn Embedder,
    index: &dyn DocumentIndex,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.poll.interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_poll_cycle(config, store, embedder, index).await {
                    // Whole-cycle failures (index discovery unreachable) are
                    // deferred to the next tick; watermarks are untouched.
                    warn!(error = %e, "poll cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping poll loop");
                return Ok(());
            }
        }
    }
}
