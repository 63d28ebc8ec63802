//! # Vector Mill CLI (`vmill`)
//!
//! The `vmill` binary drives the ingestion pipeline: database setup, the
//! three producers, the read-only records API, and store statistics.
//!
//! ## Usage
//!
//! ```bash
//! vmill --config ./config/vmill.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vmill init` | Create the SQLite database and run schema migrations |
//! | `vmill notify <file>` | Vectorize content-record events from a JSON file |
//! | `vmill harvest` | Vectorize staged scraper output, then retire the files |
//! | `vmill poll` | Run one incremental sync against the external index |
//! | `vmill poll --watch` | Keep syncing on a fixed interval |
//! | `vmill serve` | Start the read-only records HTTP API |
//! | `vmill stats` | Print record counts, model coverage, and watermarks |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use vector_mill::config::{load_config, Config};
use vector_mill::embedding::create_embedder;
use vector_mill::index_client::HttpDocumentIndex;
use vector_mill::producer_event::{parse_events, run_notify};
use vector_mill::producer_harvest::run_harvest;
use vector_mill::producer_poll::{run_poll_cycle, run_poll_loop};
use vector_mill::ratelimit::RateLimiter;
use vector_mill::store::Store;
use vector_mill::{db, migrate, server, stats};

/// Vector Mill — a multi-source embedding ingestion pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vmill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vmill",
    about = "Vector Mill — a multi-source embedding ingestion pipeline with a queryable vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the embeddings table with its
    /// `(origin, fingerprint)` uniqueness constraint, and the watermarks
    /// table. Idempotent — running it multiple times is safe.
    Init,

    /// Vectorize content-record events from a JSON file.
    ///
    /// The file holds one event or an array of events. Redelivered events
    /// are absorbed by the dedup ledger, so replaying a file is safe; this
    /// doubles as the reconciliation pass for records that missed their
    /// original trigger.
    Notify {
        /// Path to the event file.
        file: PathBuf,
    },

    /// Vectorize staged scraper output.
    ///
    /// Walks the staging directory, chunks and embeds every staged unit,
    /// and retires each file once nothing in it still needs a retry.
    Harvest,

    /// Sync the external document index.
    ///
    /// Discovers all non-system indices, fetches documents modified since
    /// each index's watermark, and embeds the new or changed ones.
    Poll {
        /// Keep running, one cycle every `poll.interval_secs` seconds.
        #[arg(long)]
        watch: bool,
    },

    /// Start the read-only records HTTP API.
    Serve,

    /// Print record counts, model coverage, and watermark ages.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }
        Commands::Notify { file } => {
            ensure_provider(&config)?;
            let payload = std::fs::read_to_string(&file)?;
            let events = parse_events(&payload)?;

            let store = open_store(&config).await?;
            let embedder = build_embedder(&config)?;

            let report = run_notify(&store, embedder.as_ref(), &events).await;
            println!("notify {}", file.display());
            println!("  events: {}", events.len());
            println!("  embedded: {}", report.embedded);
            println!("  already embedded: {}", report.already_embedded);
            println!("  skipped: {}", report.skipped);
            println!("  failed: {}", report.failed);
        }
        Commands::Harvest => {
            ensure_provider(&config)?;
            let store = open_store(&config).await?;
            let embedder = build_embedder(&config)?;

            let report = run_harvest(&config, &store, embedder.as_ref()).await?;
            println!("harvest {}", config.harvest.staging_dir.display());
            println!("  files: {} seen, {} retired, {} kept, {} quarantined",
                report.files_seen, report.files_retired, report.files_kept,
                report.files_quarantined);
            println!("  units: {} processed, {} quarantined",
                report.units_processed, report.units_quarantined);
            println!("  chunks: {} embedded, {} deduplicated",
                report.chunks_embedded, report.chunks_deduplicated);
        }
        Commands::Poll { watch } => {
            ensure_provider(&config)?;
            let store = open_store(&config).await?;
            let embedder = build_embedder(&config)?;
            let index = HttpDocumentIndex::from_config(&config.poll)?;

            if watch {
                run_poll_loop(&config, &store, embedder.as_ref(), &index).await?;
            } else {
                let report = run_poll_cycle(&config, &store, embedder.as_ref(), &index).await?;
                println!("poll");
                println!("  indices: {} discovered, {} completed, {} failed",
                    report.indices_discovered, report.indices_completed,
                    report.indices_failed);
                println!("  documents: {} seen, {} embedded, {} deduplicated",
                    report.documents_seen, report.embedded, report.deduplicated);
            }
        }
        Commands::Serve => {
            let store = open_store(&config).await?;
            server::run_server(&config, store).await?;
        }
        Commands::Stats => {
            let store = open_store(&config).await?;
            stats::run_stats(&config, &store).await?;
        }
    }

    Ok(())
}

fn ensure_provider(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.embedding.is_enabled(),
        "Embedding provider is disabled. Set [embedding] provider in config."
    );
    Ok(())
}

async fn open_store(config: &Config) -> Result<Store> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Store::new(pool))
}

fn build_embedder(config: &Config) -> Result<Arc<dyn vector_mill::embedding::Embedder>> {
    let limiter = Arc::new(RateLimiter::per_minute(
        config.embedding.requests_per_minute,
    ));
    create_embedder(&config.embedding, limiter)
}
