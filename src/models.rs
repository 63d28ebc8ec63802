//! Core data types flowing through the ingestion pipeline.
//!
//! [`EmbeddingRecord`] is the unit of persisted knowledge; everything else is
//! a producer-side shape on its way to becoming one: events from the content
//! application, staged units dropped by the scraper, and documents pulled
//! from the external index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which producer created a record. Partitions all downstream queries;
/// immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    WebHarvest,
    UserGenerated,
    ExternalIndex,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::WebHarvest => "web_harvest",
            Origin::UserGenerated => "user_generated",
            Origin::ExternalIndex => "external_index",
        }
    }

    pub const ALL: [Origin; 3] = [
        Origin::WebHarvest,
        Origin::UserGenerated,
        Origin::ExternalIndex,
    ];
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_harvest" => Ok(Origin::WebHarvest),
            "user_generated" => Ok(Origin::UserGenerated),
            "external_index" => Ok(Origin::ExternalIndex),
            other => Err(format!("unknown origin: '{}'", other)),
        }
    }
}

/// A persisted embedding, as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub origin: Origin,
    pub fingerprint: String,
    pub content: String,
    pub title: Option<String>,
    pub model: String,
    pub dims: usize,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A record about to be inserted. The store assigns `id`, `created_at`,
/// and `updated_at`.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub origin: Origin,
    pub fingerprint: String,
    pub content: String,
    pub title: Option<String>,
    pub model: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Metadata envelope for `web_harvest` records — one per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestMetadata {
    pub site_name: String,
    pub site_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub processed_at: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Metadata envelope for `user_generated` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedMetadata {
    pub record_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub is_approved: bool,
    pub processed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Metadata envelope for `external_index` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index_name: String,
    pub document_id: String,
    pub document_score: f64,
    pub source_fields: Vec<String>,
    pub text_length: usize,
    pub processed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Create/update notification for a content record, consumed by the
/// event-triggered producer. Delivery is at-least-once; the producer's
/// dedup check absorbs redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEvent {
    pub record_id: i64,
    pub created: bool,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One scraped content unit inside a staging file.
///
/// `content` is kept as raw JSON because scrapers emit strings, objects, or
/// arrays depending on the site; non-string content is serialized to text
/// before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedUnit {
    pub site_name: String,
    pub site_url: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
}
