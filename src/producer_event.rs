//! Event-triggered producer: one embedding per content-record event.
//!
//! Consumes create/update notifications from the content application and
//! vectorizes the record synchronously. The state machine:
//!
//! ```text
//! event -> should-process? -> dedup check -> embed -> persist -> supersede
//! ```
//!
//! A record is processed when it was just created, or when it was updated
//! and is currently approved. Redelivered events hit the dedup check and
//! become no-ops, so at-least-once delivery is safe. A provider failure
//! never affects the triggering write — the content is already durable; the
//! failure is logged and the record stays un-vectorized until the next
//! trigger or a reconciliation pass (`vmill notify` over a batch of
//! records).

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::fingerprint;
use crate::models::{ContentEvent, GeneratedMetadata, NewRecord, Origin};
use crate::store::{InsertOutcome, Store};

/// What processing an event amounted to.
#[derive(Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Update to a record that is not approved — not vectorized.
    SkippedUnapproved,
    /// Empty content — an embedding is never generated for nothing.
    SkippedEmpty,
    /// An embedding already exists for this record and content.
    AlreadyEmbedded { refreshed: bool },
    /// A new record was persisted.
    Embedded { record_id: String, superseded: u64 },
}

/// Totals for a batch of events (`vmill notify`).
#[derive(Debug, Default)]
pub struct NotifyReport {
    pub embedded: usize,
    pub skipped: usize,
    pub already_embedded: usize,
    pub failed: usize,
}

/// Process a single content event.
pub async fn handle_event(
    store: &Store,
    embedder: &dyn Embedder,
    event: &ContentEvent,
) -> Result<EventOutcome, PipelineError> {
    let should_process = event.created || event.is_approved;
    if !should_process {
        debug!(record_id = event.record_id, "update to unapproved record, skipping");
        return Ok(EventOutcome::SkippedUnapproved);
    }

    let content = event.content.trim();
    if content.is_empty() {
        warn!(record_id = event.record_id, "event carries no content, skipping");
        return Ok(EventOutcome::SkippedEmpty);
    }

    let fp = fingerprint::generated(event.record_id, content);
    let title = event_title(event);

    if store.fingerprint_exists(Origin::UserGenerated, &fp).await? {
        // Same record, same content. On a re-approval, refresh the mutable
        // fields; otherwise this is a redelivered event and a pure no-op.
        let refreshed = if !event.created && event.is_approved {
            store.touch_approval(&fp, &title).await?
        } else {
            false
        };
        debug!(record_id = event.record_id, refreshed, "embedding already exists");
        return Ok(EventOutcome::AlreadyEmbedded { refreshed });
    }

    let vector = embedder.embed(content).await?;

    let metadata = GeneratedMetadata {
        record_id: event.record_id,
        platform: event.platform.clone(),
        theme: event.theme.clone(),
        is_approved: event.is_approved,
        processed_at: chrono::Utc::now().to_rfc3339(),
        superseded_by: None,
        superseded_at: None,
        extra: record_timestamps(event),
    };

    let outcome = store
        .insert_record(NewRecord {
            origin: Origin::UserGenerated,
            fingerprint: fp,
            content: content.to_string(),
            title: Some(title),
            model: embedder.model_name().to_string(),
            vector,
            metadata: serde_json::to_value(&metadata)
                .map_err(|e| PipelineError::Validation(e.to_string()))?,
        })
        .await?;

    match outcome {
        InsertOutcome::Inserted(id) => {
            // A changed record gets a new row; older rows are bookkept as
            // superseded instead of mutated.
            let superseded = store.supersede_generated(event.record_id, &id).await?;
            info!(record_id = event.record_id, embedding_id = %id, superseded, "embedded content record");
            Ok(EventOutcome::Embedded {
                record_id: id,
                superseded,
            })
        }
        InsertOutcome::Duplicate => Ok(EventOutcome::AlreadyEmbedded { refreshed: false }),
    }
}

/// Process a batch of events, isolating per-event failures. Used by the
/// reconciliation pass, where a stream of pending records is re-driven
/// through the same state machine.
pub async fn run_notify(
    store: &Store,
    embedder: &dyn Embedder,
    events: &[ContentEvent],
) -> NotifyReport {
    let mut report = NotifyReport::default();

    for event in events {
        match handle_event(store, embedder, event).await {
            Ok(EventOutcome::Embedded { .. }) => report.embedded += 1,
            Ok(EventOutcome::AlreadyEmbedded { .. }) => report.already_embedded += 1,
            Ok(EventOutcome::SkippedUnapproved) | Ok(EventOutcome::SkippedEmpty) => {
                report.skipped += 1
            }
            Err(e) => {
                warn!(record_id = event.record_id, error = %e, "event processing failed");
                report.failed += 1;
            }
        }
    }

    report
}

/// Parse one event or an array of events from a notify payload.
pub fn parse_events(payload: &str) -> anyhow::Result<Vec<ContentEvent>> {
    let value: Value = serde_json::from_str(payload)?;
    let events = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => anyhow::bail!("expected a JSON object or array of content events"),
    };
    Ok(events)
}

fn event_title(event: &ContentEvent) -> String {
    match (&event.platform, &event.theme) {
        (Some(platform), Some(theme)) => format!("{}: {}", platform, theme),
        (None, Some(theme)) => theme.clone(),
        (Some(platform), None) => format!("{}: record {}", platform, event.record_id),
        (None, None) => format!("record {}", event.record_id),
    }
}

fn record_timestamps(event: &ContentEvent) -> serde_json::Map<String, Value> {
    let mut extra = serde_json::Map::new();
    if let Some(created_at) = &event.created_at {
        extra.insert("record_created_at".into(), Value::String(created_at.clone()));
    }
    if let Some(updated_at) = &event.updated_at {
        extra.insert("record_updated_at".into(), Value::String(updated_at.clone()));
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_single_object_and_array() {
        let single = r#"{"record_id": 1, "created": true, "content": "a"}"#;
        assert_eq!(parse_events(single).unwrap().len(), 1);

        let many = r#"[
            {"record_id": 1, "created": true, "content": "a"},
            {"record_id": 2, "created": false, "is_approved": true, "content": "b"}
        ]"#;
        assert_eq!(parse_events(many).unwrap().len(), 2);

        assert!(parse_events(r#""just a string""#).is_err());
    }

    #[test]
    fn titles_degrade_gracefully() {
        let mut event = ContentEvent {
            record_id: 5,
            created: true,
            is_approved: false,
            platform: Some("Instagram".into()),
            theme: Some("Winter campaign".into()),
            content: "text".into(),
            created_at: None,
            updated_at: None,
        };
        assert_eq!(event_title(&event), "Instagram: Winter campaign");

        event.theme = None;
        assert_eq!(event_title(&event), "Instagram: record 5");

        event.platform = None;
        assert_eq!(event_title(&event), "record 5");
    }
}
