//! Text extraction for external-index documents.
//!
//! Index documents arrive as arbitrary nested JSON. We pull out the values
//! of known text-bearing fields (recursing into nested objects and arrays),
//! normalize each fragment, and join them into one bounded string for
//! embedding. Documents with no recognizable text fall back to a cleaned
//! JSON rendering so nothing is silently dropped.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Field names whose string values are treated as document text.
const TEXT_FIELDS: [&str; 11] = [
    "message",
    "content",
    "text",
    "body",
    "description",
    "title",
    "summary",
    "question",
    "answer",
    "info",
    "data",
];

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]").unwrap());
static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n]+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static STRAY_SYMBOLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s[^\w\s]{1,3}\s").unwrap());
static SYMBOL_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]{3,}").unwrap());

/// Normalize a text fragment: strip byte-order marks, zero-width and control
/// characters, collapse whitespace, and drop stray symbol runs that survive
/// scraping and log shipping.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text
        .replace('\u{feff}', "")
        .replace('\u{200b}', "")
        .replace('\u{a0}', " ");

    let text = CONTROL_CHARS.replace_all(&text, "");
    let text = LINE_BREAKS.replace_all(&text, " ");
    let text = SYMBOL_RUNS.replace_all(&text, " ");
    let text = STRAY_SYMBOLS.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");

    text.trim().to_string()
}

/// Extract the embeddable text of an index document, capped at `max_chars`
/// characters.
pub fn extract_document_text(source: &Value, max_chars: usize) -> String {
    let mut parts = Vec::new();
    collect(source, &mut parts);

    let combined = parts.join(" | ");
    let text = if combined.trim().is_empty() {
        // No recognizable text fields: embed a cleaned JSON rendering.
        let repr: String = source.to_string().chars().take(max_chars * 2).collect();
        clean_text(&repr)
    } else {
        combined
    };

    truncate_chars(&text, max_chars)
}

fn collect(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let lower = key.to_ascii_lowercase();
                if TEXT_FIELDS.contains(&lower.as_str()) {
                    if let Value::String(s) = val {
                        let cleaned = clean_text(s);
                        if cleaned.chars().count() > 5 {
                            parts.push(format!("{}: {}", key, cleaned));
                        }
                        continue;
                    }
                }
                if matches!(val, Value::Object(_) | Value::Array(_)) {
                    collect(val, parts);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => collect(item, parts),
                    Value::String(s) if s.chars().count() > 10 => {
                        let cleaned = clean_text(s);
                        if cleaned.chars().count() > 5 {
                            parts.push(cleaned);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
