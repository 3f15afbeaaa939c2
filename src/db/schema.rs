// Database schema: table creation.
//
// A `schema_version` table records the schema revision a file was created
// with. Timestamps are stored as fixed-width
// RFC 3339 UTC text (nanosecond precision, `Z` suffix) so string order is
// time order and range queries can use plain comparisons.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent; safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Normalized posts, as imported from platform exports
        CREATE TABLE IF NOT EXISTS posts (
            platform TEXT NOT NULL,
            id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            likes INTEGER NOT NULL DEFAULT 0,
            reposts INTEGER NOT NULL DEFAULT 0,
            replies INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            parent_id TEXT,
            PRIMARY KEY (platform, id)
        );

        CREATE TABLE IF NOT EXISTS accounts (
            platform TEXT NOT NULL,
            id TEXT NOT NULL,
            username TEXT NOT NULL,
            PRIMARY KEY (platform, id)
        );

        -- One row per analyzed bucket, zero-activity buckets included
        CREATE TABLE IF NOT EXISTS coordination_metrics (
            platform TEXT NOT NULL,
            bucket_start TEXT NOT NULL,
            bucket_end TEXT NOT NULL,
            score REAL NOT NULL,
            cluster_count INTEGER NOT NULL,
            coordinated_post_count INTEGER NOT NULL,
            total_post_count INTEGER NOT NULL,
            organic_post_count INTEGER NOT NULL DEFAULT 0,
            edge_count INTEGER NOT NULL DEFAULT 0,
            avg_cluster_size REAL NOT NULL DEFAULT 0,
            sync_rate REAL NOT NULL DEFAULT 0,
            url_sharing_rate REAL NOT NULL DEFAULT 0,
            text_similarity_rate REAL NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (platform, bucket_start)
        );

        CREATE TABLE IF NOT EXISTS coordination_clusters (
            id TEXT PRIMARY KEY,               -- {platform}_{YYYYMMDD_HHMM}_cluster_{index}
            platform TEXT NOT NULL,
            bucket_start TEXT NOT NULL,
            community_index INTEGER NOT NULL,
            density REAL NOT NULL,
            edge_count INTEGER NOT NULL,
            primary_signal TEXT,
            topic TEXT,
            post_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cluster_members (
            cluster_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            centrality REAL NOT NULL,
            degree INTEGER NOT NULL,
            post_count INTEGER NOT NULL,
            PRIMARY KEY (cluster_id, account_id)
        );

        -- Bucket reads scan posts by platform and time
        CREATE INDEX IF NOT EXISTS idx_posts_time
            ON posts(platform, created_at);

        CREATE INDEX IF NOT EXISTS idx_clusters_bucket
            ON coordination_clusters(platform, bucket_start);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the tables in the database (shown after `murmur init`).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
