// Database queries: all SQL for the SQLite backend.
//
// Every SQLite interaction goes through this module. SqliteDatabase locks the
// connection and delegates here, and tests call these functions directly on
// an in-memory connection.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::warn;

use super::models::{ClusterMember, CoordinationCluster, CoordinationMetric, StoreStats};
use crate::error::CoordinationError;
use crate::graph::SignalType;
use crate::platforms::{Account, Engagement, Platform, Post, PostBatch};

/// Fixed-width RFC 3339 text; lexicographic order is time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_stored_ts(s: &str, column: &str) -> Result<DateTime<Utc>> {
    parse_ts(s).with_context(|| format!("Invalid stored {column} timestamp: {s:?}"))
}

/// Turn SQLite busy/locked failures into a retryable PersistenceConflict.
fn conflict_or(
    err: rusqlite::Error,
    platform: Platform,
    bucket_start: DateTime<Utc>,
) -> anyhow::Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            CoordinationError::PersistenceConflict {
                platform: platform.to_string(),
                bucket_start,
                detail: err.to_string(),
            }
            .into()
        }
        _ => anyhow::Error::new(err),
    }
}

// --- Posts and accounts ---

/// Insert or update posts, keyed by (platform, id). Returns rows written.
pub fn insert_posts(conn: &mut Connection, posts: &[Post]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO posts
                (platform, id, account_id, content, created_at,
                 likes, reposts, replies, score, parent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(platform, id) DO UPDATE SET
                account_id = excluded.account_id,
                content = excluded.content,
                created_at = excluded.created_at,
                likes = excluded.likes,
                reposts = excluded.reposts,
                replies = excluded.replies,
                score = excluded.score,
                parent_id = excluded.parent_id",
        )?;
        for post in posts {
            stmt.execute(params![
                post.platform.as_str(),
                post.id,
                post.account_id,
                post.content,
                format_ts(post.created_at),
                post.engagement.likes,
                post.engagement.reposts,
                post.engagement.replies,
                post.engagement.score,
                post.parent_id,
            ])?;
        }
    }
    tx.commit()?;
    Ok(posts.len())
}

/// Insert or update accounts, keyed by (platform, id).
pub fn upsert_accounts(conn: &mut Connection, accounts: &[Account]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO accounts (platform, id, username)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(platform, id) DO UPDATE SET username = excluded.username",
        )?;
        for account in accounts {
            stmt.execute(params![account.platform.as_str(), account.id, account.username])?;
        }
    }
    tx.commit()?;
    Ok(accounts.len())
}

/// Posts with `start <= created_at < end`, ordered by time then id.
///
/// Rows whose timestamp no longer parses are skipped, logged and counted in
/// `PostBatch::malformed`.
pub fn get_posts(
    conn: &Connection,
    platform: Platform,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<PostBatch> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, content, created_at, likes, reposts, replies, score, parent_id
         FROM posts
         WHERE platform = ?1 AND created_at >= ?2 AND created_at < ?3
         ORDER BY created_at, id",
    )?;

    let rows = stmt.query_map(
        params![platform.as_str(), format_ts(start), format_ts(end)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                Engagement {
                    likes: row.get(4)?,
                    reposts: row.get(5)?,
                    replies: row.get(6)?,
                    score: row.get(7)?,
                },
                row.get::<_, Option<String>>(8)?,
            ))
        },
    )?;

    let mut batch = PostBatch::default();
    for row in rows {
        let (id, account_id, content, created_at, engagement, parent_id) = row?;
        match parse_ts(&created_at) {
            Some(created_at) => batch.posts.push(Post {
                id,
                account_id,
                platform,
                content,
                created_at,
                engagement,
                parent_id,
            }),
            None => {
                warn!(post_id = %id, created_at = %created_at, "Skipping post with unparsable timestamp");
                batch.malformed += 1;
            }
        }
    }
    Ok(batch)
}

pub fn get_accounts(conn: &Connection, platform: Platform) -> Result<Vec<Account>> {
    let mut stmt =
        conn.prepare("SELECT id, username FROM accounts WHERE platform = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![platform.as_str()], |row| {
        Ok(Account {
            id: row.get(0)?,
            platform,
            username: row.get(1)?,
        })
    })?;
    let mut accounts = Vec::new();
    for row in rows {
        accounts.push(row?);
    }
    Ok(accounts)
}

// --- Metrics ---

fn upsert_metric_row(conn: &Connection, metric: &CoordinationMetric) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO coordination_metrics
            (platform, bucket_start, bucket_end, score, cluster_count,
             coordinated_post_count, total_post_count, organic_post_count, edge_count,
             avg_cluster_size, sync_rate, url_sharing_rate, text_similarity_rate, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(platform, bucket_start) DO UPDATE SET
            bucket_end = excluded.bucket_end,
            score = excluded.score,
            cluster_count = excluded.cluster_count,
            coordinated_post_count = excluded.coordinated_post_count,
            total_post_count = excluded.total_post_count,
            organic_post_count = excluded.organic_post_count,
            edge_count = excluded.edge_count,
            avg_cluster_size = excluded.avg_cluster_size,
            sync_rate = excluded.sync_rate,
            url_sharing_rate = excluded.url_sharing_rate,
            text_similarity_rate = excluded.text_similarity_rate,
            computed_at = excluded.computed_at",
        params![
            metric.platform.as_str(),
            format_ts(metric.bucket_start),
            format_ts(metric.bucket_end),
            metric.score,
            metric.cluster_count as i64,
            metric.coordinated_post_count as i64,
            metric.total_post_count as i64,
            metric.organic_post_count as i64,
            metric.edge_count as i64,
            metric.avg_cluster_size,
            metric.sync_rate,
            metric.url_sharing_rate,
            metric.text_similarity_rate,
            format_ts(metric.computed_at),
        ],
    )
}

/// Insert or replace the metric row for (platform, bucket_start).
pub fn upsert_metric(conn: &Connection, metric: &CoordinationMetric) -> Result<()> {
    upsert_metric_row(conn, metric)
        .map_err(|e| conflict_or(e, metric.platform, metric.bucket_start))?;
    Ok(())
}

const METRIC_COLUMNS: &str = "platform, bucket_start, bucket_end, score, cluster_count,
    coordinated_post_count, total_post_count, organic_post_count, edge_count,
    avg_cluster_size, sync_rate, url_sharing_rate, text_similarity_rate, computed_at";

type MetricRow = (
    String,
    String,
    String,
    f64,
    i64,
    i64,
    i64,
    i64,
    i64,
    f64,
    f64,
    f64,
    f64,
    String,
);

fn read_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn metric_from_row(row: MetricRow) -> Result<CoordinationMetric> {
    let (
        platform,
        bucket_start,
        bucket_end,
        score,
        cluster_count,
        coordinated_post_count,
        total_post_count,
        organic_post_count,
        edge_count,
        avg_cluster_size,
        sync_rate,
        url_sharing_rate,
        text_similarity_rate,
        computed_at,
    ) = row;
    Ok(CoordinationMetric {
        platform: platform.parse()?,
        bucket_start: parse_stored_ts(&bucket_start, "bucket_start")?,
        bucket_end: parse_stored_ts(&bucket_end, "bucket_end")?,
        score,
        cluster_count: cluster_count as usize,
        coordinated_post_count: coordinated_post_count as usize,
        total_post_count: total_post_count as usize,
        organic_post_count: organic_post_count as usize,
        edge_count: edge_count as usize,
        avg_cluster_size,
        sync_rate,
        url_sharing_rate,
        text_similarity_rate,
        computed_at: parse_stored_ts(&computed_at, "computed_at")?,
    })
}

pub fn get_metric(
    conn: &Connection,
    platform: Platform,
    bucket_start: DateTime<Utc>,
) -> Result<Option<CoordinationMetric>> {
    let sql = format!(
        "SELECT {METRIC_COLUMNS} FROM coordination_metrics
         WHERE platform = ?1 AND bucket_start = ?2"
    );
    let row = conn
        .query_row(
            &sql,
            params![platform.as_str(), format_ts(bucket_start)],
            read_metric_row,
        )
        .optional()?;
    row.map(metric_from_row).transpose()
}

/// Metrics with `start <= bucket_start < end`, oldest first.
pub fn get_metrics(
    conn: &Connection,
    platform: Platform,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<CoordinationMetric>> {
    let sql = format!(
        "SELECT {METRIC_COLUMNS} FROM coordination_metrics
         WHERE platform = ?1 AND bucket_start >= ?2 AND bucket_start < ?3
         ORDER BY bucket_start"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![platform.as_str(), format_ts(start), format_ts(end)],
        read_metric_row,
    )?;
    let mut metrics = Vec::new();
    for row in rows {
        metrics.push(metric_from_row(row?)?);
    }
    Ok(metrics)
}

/// Bucket starts already stored in `[start, end)`.
pub fn stored_buckets(
    conn: &Connection,
    platform: Platform,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<BTreeSet<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT bucket_start FROM coordination_metrics
         WHERE platform = ?1 AND bucket_start >= ?2 AND bucket_start < ?3",
    )?;
    let rows = stmt.query_map(
        params![platform.as_str(), format_ts(start), format_ts(end)],
        |row| row.get::<_, String>(0),
    )?;
    let mut buckets = BTreeSet::new();
    for row in rows {
        buckets.insert(parse_stored_ts(&row?, "bucket_start")?);
    }
    Ok(buckets)
}

// --- Clusters ---

fn insert_cluster_rows(conn: &Connection, cluster: &CoordinationCluster) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO coordination_clusters
            (id, platform, bucket_start, community_index, density, edge_count,
             primary_signal, topic, post_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            platform = excluded.platform,
            bucket_start = excluded.bucket_start,
            community_index = excluded.community_index,
            density = excluded.density,
            edge_count = excluded.edge_count,
            primary_signal = excluded.primary_signal,
            topic = excluded.topic,
            post_count = excluded.post_count",
        params![
            cluster.id,
            cluster.platform.as_str(),
            format_ts(cluster.bucket_start),
            cluster.community_index as i64,
            cluster.density,
            cluster.edge_count as i64,
            cluster.primary_signal.map(|s| s.as_str()),
            cluster.topic,
            cluster.post_count as i64,
        ],
    )?;

    conn.execute(
        "DELETE FROM cluster_members WHERE cluster_id = ?1",
        params![cluster.id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO cluster_members (cluster_id, account_id, centrality, degree, post_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for member in &cluster.members {
        stmt.execute(params![
            cluster.id,
            member.account_id,
            member.centrality,
            member.degree as i64,
            member.post_count as i64,
        ])?;
    }
    Ok(())
}

/// Insert or replace one cluster and its member list.
pub fn upsert_cluster(conn: &mut Connection, cluster: &CoordinationCluster) -> Result<()> {
    let conflict = |e| conflict_or(e, cluster.platform, cluster.bucket_start);
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(conflict)?;
    insert_cluster_rows(&tx, cluster).map_err(conflict)?;
    tx.commit().map_err(conflict)?;
    Ok(())
}

/// Write one bucket's result atomically: upsert the metric and replace the
/// bucket's clusters. Either everything lands or nothing does.
pub fn save_bucket(
    conn: &mut Connection,
    metric: &CoordinationMetric,
    clusters: &[CoordinationCluster],
) -> Result<()> {
    let conflict = |e| conflict_or(e, metric.platform, metric.bucket_start);
    let platform = metric.platform.as_str();
    let bucket_start = format_ts(metric.bucket_start);

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(conflict)?;

    upsert_metric_row(&tx, metric).map_err(conflict)?;

    // Clusters from an earlier run of this bucket may no longer exist
    tx.execute(
        "DELETE FROM cluster_members WHERE cluster_id IN
            (SELECT id FROM coordination_clusters WHERE platform = ?1 AND bucket_start = ?2)",
        params![platform, bucket_start],
    )
    .map_err(conflict)?;
    tx.execute(
        "DELETE FROM coordination_clusters WHERE platform = ?1 AND bucket_start = ?2",
        params![platform, bucket_start],
    )
    .map_err(conflict)?;

    for cluster in clusters {
        insert_cluster_rows(&tx, cluster).map_err(conflict)?;
    }

    tx.commit().map_err(conflict)?;
    Ok(())
}

/// Clusters of one bucket, in community order, members by centrality.
pub fn get_clusters(
    conn: &Connection,
    platform: Platform,
    bucket_start: DateTime<Utc>,
) -> Result<Vec<CoordinationCluster>> {
    let mut stmt = conn.prepare(
        "SELECT id, community_index, density, edge_count, primary_signal, topic, post_count
         FROM coordination_clusters
         WHERE platform = ?1 AND bucket_start = ?2
         ORDER BY community_index",
    )?;
    let rows = stmt.query_map(
        params![platform.as_str(), format_ts(bucket_start)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        },
    )?;

    let mut member_stmt = conn.prepare(
        "SELECT account_id, centrality, degree, post_count
         FROM cluster_members
         WHERE cluster_id = ?1
         ORDER BY centrality DESC, account_id",
    )?;

    let mut clusters = Vec::new();
    for row in rows {
        let (id, community_index, density, edge_count, primary_signal, topic, post_count) = row?;
        let members = member_stmt
            .query_map(params![id], |r| {
                Ok(ClusterMember {
                    account_id: r.get(0)?,
                    centrality: r.get(1)?,
                    degree: r.get::<_, i64>(2)? as usize,
                    post_count: r.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        clusters.push(CoordinationCluster {
            id,
            platform,
            bucket_start,
            community_index: community_index as usize,
            density,
            edge_count: edge_count as usize,
            primary_signal: primary_signal
                .as_deref()
                .map(str::parse::<SignalType>)
                .transpose()?,
            topic,
            post_count: post_count as usize,
            members,
        });
    }
    Ok(clusters)
}

// --- Status ---

pub fn store_stats(conn: &Connection) -> Result<StoreStats> {
    let count = |table: &str| -> Result<i64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n)
    };

    let (latest_bucket, last_computed_at): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MAX(bucket_start), MAX(computed_at) FROM coordination_metrics",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(StoreStats {
        posts: count("posts")?,
        accounts: count("accounts")?,
        metrics: count("coordination_metrics")?,
        clusters: count("coordination_clusters")?,
        latest_bucket: latest_bucket.as_deref().and_then(parse_ts),
        last_computed_at: last_computed_at.as_deref().and_then(parse_ts),
    })
}
