//! # Vector Mill
//!
//! A multi-source embedding ingestion pipeline with a queryable vector store.
//!
//! Three independently triggered producers reconcile heterogeneous content
//! sources against one shared store, deduplicating by content fingerprint so
//! provider quota is never spent twice on the same text:
//!
//! ```text
//! ┌───────────────────┐
//! │ content events     │──▶ producer_event ──┐
//! ├───────────────────┤                      │      ┌──────────────┐
//! │ staged harvest     │──▶ producer_harvest ─┼────▶│   SQLite     │
//! │ files (scraper)    │    (chunk + embed)   │      │  embeddings  │
//! ├───────────────────┤                      │      │  watermarks  │
//! │ external document  │──▶ producer_poll ────┘      └──────┬───────┘
//! │ index (polled)     │    (watermarked)                   │
//! └───────────────────┘                                    ▼
//!        all embedding calls share one rate-limited    read-only HTTP
//!        provider client with bounded retries          records API
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! vmill init                       # create the database
//! vmill notify events.json         # vectorize content-record events
//! vmill harvest                    # vectorize staged scraper output
//! vmill poll                       # one incremental index sync
//! vmill poll --watch               # sync every poll.interval_secs
//! vmill serve                      # read-only records API
//! vmill stats                      # what's in the store
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Record, metadata envelope, and producer input types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`chunk`] | Overlapping text chunker |
//! | [`fingerprint`] | Per-origin dedup key derivation |
//! | [`embedding`] | Embedding provider client with retry and rate limiting |
//! | [`ratelimit`] | Shared token bucket |
//! | [`store`] | Record persistence and watermarks |
//! | [`extract`] | Text extraction from index documents |
//! | [`index_client`] | External document index client |
//! | [`producer_event`] | Event-triggered producer |
//! | [`producer_harvest`] | Batch-file producer |
//! | [`producer_poll`] | Incremental-poll producer |
//! | [`server`] | Read-only records HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Store overview |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index_client;
pub mod migrate;
pub mod models;
pub mod producer_event;
pub mod producer_harvest;
pub mod producer_poll;
pub mod ratelimit;
pub mod server;
pub mod stats;
pub mod store;
