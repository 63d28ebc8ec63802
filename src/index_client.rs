//! Client for the external document index.
//!
//! The poll producer talks to the index through the [`DocumentIndex`] trait
//! so the cycle logic stays testable without a live server. The shipped
//! implementation, [`HttpDocumentIndex`], targets an Elasticsearch-compatible
//! HTTP API: `_cat/indices` for discovery and `{index}/_search` with a
//! `@timestamp` range query for incremental fetches, paged via `from`/`size`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::PollConfig;
use crate::error::PipelineError;

/// One document returned by an index query.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub id: String,
    pub score: f64,
    pub source: Value,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Names of all indices currently present, system indices included —
    /// the producer filters those out.
    async fn indices(&self) -> Result<Vec<String>, PipelineError>;

    /// Documents in `index` modified since the watermark, oldest watermark
    /// meaning "everything".
    async fn documents_since(
        &self,
        index: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IndexDocument>, PipelineError>;
}

pub struct HttpDocumentIndex {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    max_pages: usize,
}

impl HttpDocumentIndex {
    pub fn from_config(config: &PollConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("poll.base_url required to run the poll producer"))?;

        let mut headers = HeaderMap::new();
        if let Some(env_name) = &config.api_key_env {
            let key = std::env::var(env_name)
                .map_err(|_| anyhow::anyhow!("{} environment variable not set", env_name))?;
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("ApiKey {}", key.trim()))
                    .map_err(|_| anyhow::anyhow!("invalid characters in {}", env_name))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }
}

#[derive(Deserialize)]
struct CatIndexEntry {
    index: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
}

#[async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn indices(&self) -> Result<Vec<String>, PipelineError> {
        let url = format!("{}/_cat/indices?format=json", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::IndexUnavailable(format!(
                "{} from {}",
                status, url
            )));
        }

        let entries: Vec<CatIndexEntry> = response
            .json()
            .await
            .map_err(|e| PipelineError::IndexUnavailable(format!("bad index listing: {}", e)))?;

        Ok(entries.into_iter().map(|entry| entry.index).collect())
    }

    async fn documents_since(
        &self,
        index: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IndexDocument>, PipelineError> {
        let url = format!("{}/{}/_search", self.base_url, index);

        let query = match since {
            Some(watermark) => serde_json::json!({
                "range": { "@timestamp": { "gte": watermark.to_rfc3339() } }
            }),
            None => serde_json::json!({ "match_all": {} }),
        };

        let mut documents = Vec::new();

        for page in 0..self.max_pages {
            let body = serde_json::json!({
                "query": query.clone(),
                "size": self.page_size,
                "from": page * self.page_size,
                "sort": ["_doc"],
            });

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PipelineError::IndexUnavailable(format!(
                    "{} from {}",
                    status, url
                )));
            }

            let parsed: SearchResponse = response
                .json()
                .await
                .map_err(|e| PipelineError::IndexUnavailable(format!("bad search response: {}", e)))?;

            let page_len = parsed.hits.hits.len();
            documents.extend(parsed.hits.hits.into_iter().map(|hit| IndexDocument {
                id: hit.id,
                score: hit.score.unwrap_or(0.0),
                source: hit.source,
            }));

            if page_len < self.page_size {
                return Ok(documents);
            }
        }

        warn!(
            index,
            fetched = documents.len(),
            max_pages = self.max_pages,
            "page cap reached; remaining documents will be picked up next cycle"
        );
        Ok(documents)
    }
}
