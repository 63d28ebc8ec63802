//! Error taxonomy for the ingestion pipeline.
//!
//! Producers isolate failures per unit of work; how a unit's error is
//! classified decides what happens next:
//!
//! - [`PipelineError::Validation`] — the unit is unusable (empty or malformed
//!   content). Skip it, never retry.
//! - [`PipelineError::ProviderUnavailable`] — transient provider failure after
//!   bounded retries. Defer the unit to the next cycle.
//! - [`PipelineError::ProviderRejected`] — the provider will never accept this
//!   input. Log and skip; retrying the same content is wasted quota.
//! - [`PipelineError::StoreConflict`] — a concurrent writer persisted the same
//!   `(origin, fingerprint)` first. Benign; treat as a no-op.
//! - [`PipelineError::Store`] — the store is unreachable or failing. Abort the
//!   current cycle and preserve staged/watermark state for retry.
//! - [`PipelineError::IndexUnavailable`] — the external document index is
//!   unreachable. Abort the affected index's cycle; its watermark stays put.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider rejected input: {0}")]
    ProviderRejected(String),

    #[error("a record with this origin and fingerprint already exists")]
    StoreConflict,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("document index unavailable: {0}")]
    IndexUnavailable(String),
}

impl PipelineError {
    /// Whether retrying the same unit later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::ProviderUnavailable(_)
                | PipelineError::Store(_)
                | PipelineError::IndexUnavailable(_)
        )
    }
}
