// System status display: store location, row counts, latest analyzed bucket.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::db::Database;

/// Display store status to the terminal.
///
/// `db_display_path` is the SQLite file path, or a redacted description of
/// the Postgres connection.
pub async fn show(db: &Arc<dyn Database>, db_display_path: &str, is_file: bool) -> Result<()> {
    if is_file {
        let file_size = std::fs::metadata(Path::new(db_display_path))
            .map(|m| format_bytes(m.len()))
            .unwrap_or_else(|_| "unknown".to_string());
        println!("Database: {db_display_path} ({file_size})");
    } else {
        println!("Database: {db_display_path}");
    }

    let stats = db.store_stats().await?;
    println!("Tables: {}", db.table_count().await?);
    println!("Posts: {} from {} accounts", stats.posts, stats.accounts);
    println!(
        "Metrics: {} buckets, {} clusters",
        stats.metrics, stats.clusters
    );

    match stats.latest_bucket {
        Some(bucket) => println!("Latest bucket: {}", bucket.format("%Y-%m-%d %H:%M UTC")),
        None => {
            println!("Latest bucket: none analyzed yet");
            println!("  Run `murmur analyze --platform <p> --hours 24` to compute metrics");
        }
    }
    if let Some(computed) = stats.last_computed_at {
        println!("Last computed: {}", computed.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
