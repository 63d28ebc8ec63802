//! Batch-file producer: vectorize staged harvest output.
//!
//! Phase 1 (the external scraper) drops JSON files of staged units into the
//! staging directory. Phase 2 — this module — chunks each unit, runs every
//! chunk through dedup-check → embed → persist, and retires the file once
//! nothing in it still needs a retry:
//!
//! - a transient failure (provider or store unavailable) keeps the file in
//!   place; the next run re-walks it, and the dedup ledger skips the chunks
//!   that already made it;
//! - validation failures and permanent provider rejections are appended to a
//!   quarantine file next to the staging area so they stay visible for
//!   manual review instead of being silently lost;
//! - a file that cannot be parsed at all is moved to quarantine whole.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::fingerprint;
use crate::models::{HarvestMetadata, NewRecord, Origin, StagedUnit};
use crate::store::{InsertOutcome, Store};

const QUARANTINE_DIR: &str = "quarantine";

#[derive(Debug, Default)]
pub struct HarvestReport {
    pub files_seen: usize,
    pub files_retired: usize,
    pub files_kept: usize,
    pub files_quarantined: usize,
    pub units_processed: usize,
    pub units_quarantined: usize,
    pub chunks_embedded: usize,
    pub chunks_deduplicated: usize,
    pub transient_failures: usize,
}

#[derive(Serialize)]
struct QuarantinedUnit<'a> {
    reason: String,
    unit: &'a StagedUnit,
}

enum UnitOutcome {
    Completed,
    Rejected(String),
    Transient,
}

/// Run one pass over the staging area.
pub async fn run_harvest(
    config: &Config,
    store: &Store,
    embedder: &dyn Embedder,
) -> Result<HarvestReport> {
    let staging_dir = &config.harvest.staging_dir;
    let mut report = HarvestReport::default();

    if !staging_dir.exists() {
        info!(dir = %staging_dir.display(), "staging directory does not exist, nothing to do");
        return Ok(report);
    }

    let include = build_globset(&config.harvest.include_globs)?;
    let files = staged_files(staging_dir, &include)?;

    for file in files {
        report.files_seen += 1;
        process_file(config, store, embedder, &file, &mut report).await?;
    }

    info!(
        files_seen = report.files_seen,
        files_retired = report.files_retired,
        chunks_embedded = report.chunks_embedded,
        chunks_deduplicated = report.chunks_deduplicated,
        "harvest pass complete"
    );

    Ok(report)
}

async fn process_file(
    config: &Config,
    store: &Store,
    embedder: &dyn Embedder,
    file: &Path,
    report: &mut HarvestReport,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading staged file {}", file.display()))?;

    let units: Vec<StagedUnit> = match serde_json::from_str(&raw) {
        Ok(units) => units,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "unparseable staging file, quarantining");
            quarantine_file(config, file)?;
            report.files_quarantined += 1;
            return Ok(());
        }
    };

    let mut quarantined: Vec<QuarantinedUnit<'_>> = Vec::new();
    let mut needs_retry = false;

    for unit in &units {
        match process_unit(config, store, embedder, unit, report).await? {
            UnitOutcome::Completed => report.units_processed += 1,
            UnitOutcome::Rejected(reason) => {
                warn!(site = %unit.site_name, reason = %reason, "unit quarantined");
                quarantined.push(QuarantinedUnit { reason, unit });
                report.units_quarantined += 1;
            }
            UnitOutcome::Transient => {
                needs_retry = true;
                report.transient_failures += 1;
            }
        }
    }

    if needs_retry {
        // The file stays; already-persisted chunks are absorbed by the
        // dedup ledger on the next pass.
        info!(file = %file.display(), "transient failures, keeping staged file for retry");
        report.files_kept += 1;
        return Ok(());
    }

    if !quarantined.is_empty() {
        write_quarantined_units(config, file, &quarantined)?;
    }

    std::fs::remove_file(file)
        .with_context(|| format!("retiring staged file {}", file.display()))?;
    debug!(file = %file.display(), "staged file retired");
    report.files_retired += 1;

    Ok(())
}

async fn process_unit(
    config: &Config,
    store: &Store,
    embedder: &dyn Embedder,
    unit: &StagedUnit,
    report: &mut HarvestReport,
) -> Result<UnitOutcome> {
    if let Some(status) = &unit.status {
        if status != "success" {
            return Ok(UnitOutcome::Rejected(format!("harvest status '{}'", status)));
        }
    }

    let content = unit_content(unit);
    let content = content.trim();
    if content.is_empty() {
        return Ok(UnitOutcome::Rejected("empty content".to_string()));
    }

    let chunks = chunk_text(
        content,
        config.chunking.max_chars,
        config.chunking.overlap_chars,
    );
    let total_chunks = chunks.len();

    for (chunk_index, chunk) in chunks.iter().enumerate() {
        let fp = fingerprint::harvest(&unit.site_name, chunk);
        if store.fingerprint_exists(Origin::WebHarvest, &fp).await? {
            report.chunks_deduplicated += 1;
            continue;
        }

        let vector = match embedder.embed(chunk).await {
            Ok(vector) => vector,
            Err(e) if e.is_transient() => {
                warn!(site = %unit.site_name, chunk_index, error = %e, "transient embed failure");
                return Ok(UnitOutcome::Transient);
            }
            Err(e) => return Ok(UnitOutcome::Rejected(e.to_string())),
        };

        let metadata = HarvestMetadata {
            site_name: unit.site_name.clone(),
            site_url: unit.site_url.clone(),
            url: unit.url.clone(),
            category: unit.category.clone(),
            scraped_at: unit.scraped_at.clone(),
            chunk_index,
            total_chunks,
            processed_at: chrono::Utc::now().to_rfc3339(),
            extra: serde_json::Map::new(),
        };

        let insert = store
            .insert_record(NewRecord {
                origin: Origin::WebHarvest,
                fingerprint: fp,
                content: chunk.clone(),
                title: Some(chunk_title(&unit.site_name, chunk_index, total_chunks)),
                model: embedder.model_name().to_string(),
                vector,
                metadata: serde_json::to_value(&metadata)
                    .map_err(|e| PipelineError::Validation(e.to_string()))?,
            })
            .await;

        match insert {
            Ok(InsertOutcome::Inserted(id)) => {
                debug!(embedding_id = %id, site = %unit.site_name, chunk_index, "chunk persisted");
                report.chunks_embedded += 1;
            }
            Ok(InsertOutcome::Duplicate) => report.chunks_deduplicated += 1,
            Err(e) if e.is_transient() => {
                warn!(site = %unit.site_name, chunk_index, error = %e, "store failure");
                return Ok(UnitOutcome::Transient);
            }
            Err(e) => return Ok(UnitOutcome::Rejected(e.to_string())),
        }
    }

    Ok(UnitOutcome::Completed)
}

/// Scrapers emit strings for article pages but structured values for feeds;
/// non-string content is embedded as its JSON text.
fn unit_content(unit: &StagedUnit) -> String {
    match &unit.content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn chunk_title(site_name: &str, chunk_index: usize, total_chunks: usize) -> String {
    if total_chunks > 1 {
        format!("{} ({}/{})", site_name, chunk_index + 1, total_chunks)
    } else {
        site_name.to_string()
    }
}

fn staged_files(staging_dir: &Path, include: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(staging_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if include.is_match(Path::new(&name)) {
            files.push(entry.path());
        }
    }
    // Deterministic order: scrapers name files by timestamp.
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn quarantine_dir(config: &Config) -> PathBuf {
    config.harvest.staging_dir.join(QUARANTINE_DIR)
}

fn quarantine_file(config: &Config, file: &Path) -> Result<()> {
    let dir = quarantine_dir(config);
    std::fs::create_dir_all(&dir)?;
    let target = dir.join(file.file_name().unwrap_or_default());
    std::fs::rename(file, &target)
        .with_context(|| format!("quarantining {}", file.display()))?;
    Ok(())
}

fn write_quarantined_units(
    config: &Config,
    file: &Path,
    units: &[QuarantinedUnit<'_>],
) -> Result<()> {
    let dir = quarantine_dir(config);
    std::fs::create_dir_all(&dir)?;
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "staged".to_string());
    let target = dir.join(format!("{}.rejected.json", stem));
    let payload = serde_json::to_string_pretty(units)?;
    std::fs::write(&target, payload)
        .with_context(|| format!("writing quarantine file {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_content_becomes_json_text() {
        let unit = StagedUnit {
            site_name: "Feed".into(),
            site_url: "https://feed.example".into(),
            url: None,
            category: None,
            status: Some("success".into()),
            scraped_at: None,
            content: serde_json::json!({ "headline": "Launch", "body": "Details" }),
        };
        let content = unit_content(&unit);
        assert!(content.contains("headline"));
        assert!(content.contains("Details"));
    }

    #[test]
    fn chunk_titles_number_multi_chunk_units() {
        assert_eq!(chunk_title("Blog", 0, 1), "Blog");
        assert_eq!(chunk_title("Blog", 0, 2), "Blog (1/2)");
        assert_eq!(chunk_title("Blog", 1, 2), "Blog (2/2)");
    }
}
