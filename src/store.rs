//! The embedding store — shared persistence target for all three producers,
//! and the read side of the dedup ledger.
//!
//! Every write here is a single, independently committed unit of work, so a
//! producer interrupted between chunks or documents leaves nothing half
//! done. Duplicate `(origin, fingerprint)` inserts surface as
//! [`InsertOutcome::Duplicate`] rather than an error.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::PipelineError;
use crate::models::{EmbeddingRecord, NewRecord, Origin};

/// What happened to an insert attempt.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(String),
    /// Another writer got there first. Benign — the content is stored.
    Duplicate,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new record. A `(origin, fingerprint)` collision reports
    /// [`InsertOutcome::Duplicate`] instead of failing, which makes redundant
    /// producer invocations and cross-producer races harmless.
    pub async fn insert_record(&self, record: NewRecord) -> Result<InsertOutcome, PipelineError> {
        if record.vector.is_empty() {
            return Err(PipelineError::Validation(
                "refusing to persist a record without a vector".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let blob = vec_to_blob(&record.vector);
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| PipelineError::Validation(format!("unserializable metadata: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO embeddings
                (id, origin, fingerprint, content, title, model, dims, vector,
                 metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(record.origin.as_str())
        .bind(&record.fingerprint)
        .bind(&record.content)
        .bind(&record.title)
        .bind(&record.model)
        .bind(record.vector.len() as i64)
        .bind(&blob)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(id)),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The dedup ledger's existence check. Producers call this before
    /// spending provider quota on a candidate.
    pub async fn fingerprint_exists(
        &self,
        origin: Origin,
        fingerprint: &str,
    ) -> Result<bool, PipelineError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings WHERE origin = ? AND fingerprint = ?",
        )
        .bind(origin.as_str())
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Mark every earlier `user_generated` record for `record_id` as
    /// superseded by `new_id`. Vector and content stay untouched — only
    /// metadata bookkeeping changes.
    pub async fn supersede_generated(
        &self,
        record_id: i64,
        new_id: &str,
    ) -> Result<u64, PipelineError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE embeddings \
             SET metadata_json = json_set(metadata_json, '$.superseded_by', ?, '$.superseded_at', ?), \
                 updated_at = ? \
             WHERE origin = ? AND id != ? \
               AND json_extract(metadata_json, '$.superseded_by') IS NULL \
               AND json_extract(metadata_json, '$.record_id') = ?",
        )
        .bind(new_id)
        .bind(now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(now.timestamp())
        .bind(Origin::UserGenerated.as_str())
        .bind(new_id)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark every earlier `external_index` record for the same document as
    /// superseded by `new_id`.
    pub async fn supersede_index_document(
        &self,
        index_name: &str,
        document_id: &str,
        new_id: &str,
    ) -> Result<u64, PipelineError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE embeddings \
             SET metadata_json = json_set(metadata_json, '$.superseded_by', ?, '$.superseded_at', ?), \
                 updated_at = ? \
             WHERE origin = ? AND id != ? \
               AND json_extract(metadata_json, '$.superseded_by') IS NULL \
               AND json_extract(metadata_json, '$.index_name') = ? \
               AND json_extract(metadata_json, '$.document_id') = ?",
        )
        .bind(new_id)
        .bind(now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(now.timestamp())
        .bind(Origin::ExternalIndex.as_str())
        .bind(new_id)
        .bind(index_name)
        .bind(document_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Refresh the mutable fields of an existing record — title and the
    /// approval flag — e.g. when a record is re-approved. Vector and content
    /// are never touched.
    pub async fn touch_approval(
        &self,
        fingerprint: &str,
        title: &str,
    ) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            "UPDATE embeddings \
             SET title = ?, \
                 metadata_json = json_set(metadata_json, '$.is_approved', json('true')), \
                 updated_at = ? \
             WHERE origin = ? AND fingerprint = ?",
        )
        .bind(title)
        .bind(Utc::now().timestamp())
        .bind(Origin::UserGenerated.as_str())
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT id, origin, fingerprint, content, title, model, dims, vector, \
                    metadata_json, created_at, updated_at \
             FROM embeddings WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// List records, newest first, optionally filtered by origin and a
    /// substring match over title/content.
    pub async fn list(
        &self,
        origin: Option<Origin>,
        q: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EmbeddingRecord>, PipelineError> {
        let mut builder: sqlx::QueryBuilder<'_, sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT id, origin, fingerprint, content, title, model, dims, vector, \
             metadata_json, created_at, updated_at FROM embeddings WHERE 1 = 1",
        );

        if let Some(origin) = origin {
            builder.push(" AND origin = ").push_bind(origin.as_str());
        }
        if let Some(q) = q {
            let pattern = format!("%{}%", q);
            builder
                .push(" AND (content LIKE ")
                .push_bind(pattern.clone())
                .push(" OR title LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Read an index's sync watermark, if one has ever been written.
    pub async fn watermark(
        &self,
        index_name: &str,
    ) -> Result<Option<DateTime<Utc>>, PipelineError> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM watermarks WHERE index_name = ?")
                .bind(index_name)
                .fetch_optional(&self.pool)
                .await?;

        match cursor {
            None => Ok(None),
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    PipelineError::Validation(format!(
                        "corrupt watermark for index '{}': {}",
                        index_name, e
                    ))
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
        }
    }

    /// Advance an index's watermark. Callers must only invoke this after the
    /// whole cycle's records for that index are durably stored.
    pub async fn set_watermark(
        &self,
        index_name: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO watermarks (index_name, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(index_name) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(index_name)
        .bind(cursor.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn counts_by_origin(&self) -> Result<Vec<(String, i64)>, PipelineError> {
        let rows = sqlx::query(
            "SELECT origin, COUNT(*) AS record_count FROM embeddings \
             GROUP BY origin ORDER BY origin",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("origin"), row.get("record_count")))
            .collect())
    }

    pub async fn watermarks(&self) -> Result<Vec<(String, String, i64)>, PipelineError> {
        let rows =
            sqlx::query("SELECT index_name, cursor, updated_at FROM watermarks ORDER BY index_name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("index_name"),
                    row.get("cursor"),
                    row.get("updated_at"),
                )
            })
            .collect())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<EmbeddingRecord, PipelineError> {
    let origin: String = row.get("origin");
    let origin = origin
        .parse::<Origin>()
        .map_err(PipelineError::Validation)?;

    let blob: Vec<u8> = row.get("vector");
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| PipelineError::Validation(format!("corrupt metadata: {}", e)))?;

    Ok(EmbeddingRecord {
        id: row.get("id"),
        origin,
        fingerprint: row.get("fingerprint"),
        content: row.get("content"),
        title: row.get("title"),
        model: row.get("model"),
        dims: row.get::<i64, _>("dims") as usize,
        vector: blob_to_vec(&blob),
        metadata,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, Store::new(pool))
    }

    fn sample_record(fingerprint: &str) -> NewRecord {
        NewRecord {
            origin: Origin::WebHarvest,
            fingerprint: fingerprint.to_string(),
            content: "some harvested text".to_string(),
            title: Some("Example".to_string()),
            model: "test-model".to_string(),
            vector: vec![0.25, -0.5, 1.0],
            metadata: serde_json::json!({ "processed_at": "2024-01-01T00:00:00Z" }),
        }
    }

    #[tokio::test]
    async fn insert_then_duplicate_is_benign() {
        let (_tmp, store) = test_store().await;

        let first = store.insert_record(sample_record("fp-1")).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert_record(sample_record("fp-1")).await.unwrap();
        assert!(matches!(second, InsertOutcome::Duplicate));

        let records = store.list(Some(Origin::WebHarvest), None, 10).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn same_fingerprint_under_different_origin_is_allowed() {
        let (_tmp, store) = test_store().await;

        store.insert_record(sample_record("fp-x")).await.unwrap();
        let mut other = sample_record("fp-x");
        other.origin = Origin::ExternalIndex;
        let outcome = store.insert_record(other).await.unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn fingerprint_exists_reflects_inserts() {
        let (_tmp, store) = test_store().await;

        assert!(!store
            .fingerprint_exists(Origin::WebHarvest, "fp-2")
            .await
            .unwrap());
        store.insert_record(sample_record("fp-2")).await.unwrap();
        assert!(store
            .fingerprint_exists(Origin::WebHarvest, "fp-2")
            .await
            .unwrap());
        assert!(!store
            .fingerprint_exists(Origin::UserGenerated, "fp-2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn vector_round_trips_through_the_blob_column() {
        let (_tmp, store) = test_store().await;

        let outcome = store.insert_record(sample_record("fp-3")).await.unwrap();
        let InsertOutcome::Inserted(id) = outcome else {
            panic!("expected insert");
        };
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.vector, vec![0.25, -0.5, 1.0]);
        assert_eq!(record.dims, 3);
        assert_eq!(record.origin, Origin::WebHarvest);
    }

    #[tokio::test]
    async fn watermark_round_trips_and_overwrites() {
        let (_tmp, store) = test_store().await;

        assert!(store.watermark("crm").await.unwrap().is_none());

        let first = Utc::now();
        store.set_watermark("crm", first).await.unwrap();
        assert_eq!(store.watermark("crm").await.unwrap().unwrap(), first);

        let later = first + chrono::Duration::seconds(90);
        store.set_watermark("crm", later).await.unwrap();
        assert_eq!(store.watermark("crm").await.unwrap().unwrap(), later);
    }

    #[tokio::test]
    async fn supersede_marks_only_older_records() {
        let (_tmp, store) = test_store().await;

        let mut old = sample_record("gen-old");
        old.origin = Origin::UserGenerated;
        old.metadata = serde_json::json!({ "record_id": 7, "is_approved": true });
        let InsertOutcome::Inserted(old_id) = store.insert_record(old).await.unwrap() else {
            panic!("expected insert");
        };

        let mut new = sample_record("gen-new");
        new.origin = Origin::UserGenerated;
        new.metadata = serde_json::json!({ "record_id": 7, "is_approved": true });
        let InsertOutcome::Inserted(new_id) = store.insert_record(new).await.unwrap() else {
            panic!("expected insert");
        };

        let marked = store.supersede_generated(7, &new_id).await.unwrap();
        assert_eq!(marked, 1);

        let old_record = store.get(&old_id).await.unwrap().unwrap();
        assert_eq!(old_record.metadata["superseded_by"], new_id);
        assert!(old_record.metadata["superseded_at"].is_string());

        let new_record = store.get(&new_id).await.unwrap().unwrap();
        assert!(new_record.metadata.get("superseded_by").is_none());
    }

    #[tokio::test]
    async fn touch_approval_updates_title_without_touching_vector() {
        let (_tmp, store) = test_store().await;

        let mut record = sample_record("gen-touch");
        record.origin = Origin::UserGenerated;
        record.metadata = serde_json::json!({ "record_id": 9, "is_approved": false });
        let InsertOutcome::Inserted(id) = store.insert_record(record).await.unwrap() else {
            panic!("expected insert");
        };

        assert!(store.touch_approval("gen-touch", "New title").await.unwrap());

        let updated = store.get(&id).await.unwrap().unwrap();
        assert_eq!(updated.title.as_deref(), Some("New title"));
        assert_eq!(updated.metadata["is_approved"], true);
        assert_eq!(updated.vector, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn list_filters_by_origin_and_substring() {
        let (_tmp, store) = test_store().await;

        store.insert_record(sample_record("fp-a")).await.unwrap();
        let mut generated = sample_record("fp-b");
        generated.origin = Origin::UserGenerated;
        generated.content = "an instagram caption".to_string();
        store.insert_record(generated).await.unwrap();

        let harvested = store.list(Some(Origin::WebHarvest), None, 10).await.unwrap();
        assert_eq!(harvested.len(), 1);

        let matched = store.list(None, Some("instagram"), 10).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].origin, Origin::UserGenerated);

        let missed = store.list(None, Some("tiktok"), 10).await.unwrap();
        assert!(missed.is_empty());
    }
}
