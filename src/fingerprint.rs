//! Fingerprint derivation — the write side of the dedup ledger.
//!
//! A fingerprint is the deterministic key that tells a producer "this content
//! has already been vectorized". Derivation differs per origin because each
//! source has a different notion of identity:
//!
//! - user-generated records are identified by their source record id plus a
//!   content digest, so a redelivered event is a no-op while an approved
//!   rewrite produces a fresh key;
//! - harvested chunks are identified by site + chunk text, so re-scraping an
//!   unchanged page costs nothing;
//! - external-index documents are identified by index + document id + the
//!   extracted body, so score or metadata churn in the source index never
//!   triggers re-embedding.
//!
//! Producers must consult [`crate::store::Store::fingerprint_exists`] with
//! these keys **before** calling the embedding provider.

use sha2::{Digest, Sha256};

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint for a `user_generated` record: the stable record reference
/// plus a short content digest.
pub fn generated(record_id: i64, content: &str) -> String {
    let digest = sha256_hex(&[content]);
    format!("text-{}:{}", record_id, &digest[..16])
}

/// Fingerprint for a `web_harvest` chunk.
pub fn harvest(site_name: &str, chunk: &str) -> String {
    sha256_hex(&[site_name, chunk])
}

/// Fingerprint for an `external_index` document.
pub fn external_index(index_name: &str, document_id: &str, body: &str) -> String {
    sha256_hex(&[index_name, document_id, body])
}
