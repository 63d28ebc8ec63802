//! Store overview for operators.
//!
//! Quick confirmation that producers are doing their job: record counts per
//! origin, model coverage, and how stale each poll watermark is.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::models::Origin;
use crate::store::Store;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, store: &Store) -> Result<()> {
    let counts = store.counts_by_origin().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Vector Mill — Store Stats");
    println!("=========================");
    println!();
    println!("  Database:  {}", config.db.path.display());
    println!("  Size:      {}", format_bytes(db_size));
    println!();
    println!("  Records:   {}", total);
    println!();
    println!("  By origin:");
    println!("  {:<18} {:>8}", "ORIGIN", "RECORDS");
    for origin in Origin::ALL {
        let count = counts
            .iter()
            .find(|(name, _)| name == origin.as_str())
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!("  {:<18} {:>8}", origin.as_str(), count);
    }

    let models = sqlx::query(
        "SELECT model, dims, COUNT(*) AS record_count FROM embeddings \
         GROUP BY model, dims ORDER BY record_count DESC",
    )
    .fetch_all(store.pool())
    .await?;

    if !models.is_empty() {
        println!();
        println!("  By model:");
        println!("  {:<28} {:>6} {:>8}", "MODEL", "DIMS", "RECORDS");
        for row in &models {
            println!(
                "  {:<28} {:>6} {:>8}",
                row.get::<String, _>("model"),
                row.get::<i64, _>("dims"),
                row.get::<i64, _>("record_count"),
            );
        }
    }

    let watermarks = store.watermarks().await?;
    if !watermarks.is_empty() {
        println!();
        println!("  Poll watermarks:");
        println!("  {:<24} {:<32} {}", "INDEX", "CURSOR", "ADVANCED");
        for (index_name, cursor, updated_at) in &watermarks {
            println!(
                "  {:<24} {:<32} {}",
                index_name,
                cursor,
                format_ts_relative(*updated_at)
            );
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
