// PgDatabase: PostgreSQL backend implementing the Database trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Differences from SQLite:
// - TIMESTAMPTZ instead of fixed-width TEXT for timestamps
// - BIGINT counters, DOUBLE PRECISION scores
// - $1/$2 parameter syntax (handled by sqlx)
// - serialization failures and deadlocks map to PersistenceConflict

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{ClusterMember, CoordinationCluster, CoordinationMetric, StoreStats};
use super::traits::Database;
use crate::error::CoordinationError;
use crate::graph::SignalType;
use crate::platforms::{Account, Engagement, Platform, Post, PostBatch};

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

/// SQLSTATEs worth retrying: serialization_failure, deadlock_detected,
/// lock_not_available.
const CONFLICT_STATES: [&str; 3] = ["40001", "40P01", "55P03"];

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on one dedicated connection so two
    /// processes starting together don't apply the same migration twice. The
    /// unlock always runs, even when a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "MURMUR" as a big-endian i64
        const MIGRATION_LOCK_KEY: i64 = 0x4D55_524D_5552;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(
                1,
                include_str!("../../migrations/postgres/0001_initial.sql"),
            )];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    // Schema change and schema_version insert commit together
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }
}

/// Turn retryable database errors into a PersistenceConflict.
fn conflict_or(
    err: sqlx_core::Error,
    platform: Platform,
    bucket_start: DateTime<Utc>,
) -> anyhow::Error {
    let retryable = match &err {
        sqlx_core::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| CONFLICT_STATES.contains(&&*code)),
        _ => false,
    };
    if retryable {
        CoordinationError::PersistenceConflict {
            platform: platform.to_string(),
            bucket_start,
            detail: err.to_string(),
        }
        .into()
    } else {
        anyhow::Error::new(err)
    }
}

fn metric_from_row(row: &PgRow) -> Result<CoordinationMetric> {
    let platform: String = row.try_get("platform")?;
    Ok(CoordinationMetric {
        platform: platform.parse()?,
        bucket_start: row.try_get("bucket_start")?,
        bucket_end: row.try_get("bucket_end")?,
        score: row.try_get("score")?,
        cluster_count: row.try_get::<i64, _>("cluster_count")? as usize,
        coordinated_post_count: row.try_get::<i64, _>("coordinated_post_count")? as usize,
        total_post_count: row.try_get::<i64, _>("total_post_count")? as usize,
        organic_post_count: row.try_get::<i64, _>("organic_post_count")? as usize,
        edge_count: row.try_get::<i64, _>("edge_count")? as usize,
        avg_cluster_size: row.try_get("avg_cluster_size")?,
        sync_rate: row.try_get("sync_rate")?,
        url_sharing_rate: row.try_get("url_sharing_rate")?,
        text_similarity_rate: row.try_get("text_similarity_rate")?,
        computed_at: row.try_get("computed_at")?,
    })
}

const METRIC_COLUMNS: &str = "platform, bucket_start, bucket_end, score, cluster_count,
    coordinated_post_count, total_post_count, organic_post_count, edge_count,
    avg_cluster_size, sync_rate, url_sharing_rate, text_similarity_rate, computed_at";

const UPSERT_METRIC: &str = "INSERT INTO coordination_metrics
        (platform, bucket_start, bucket_end, score, cluster_count,
         coordinated_post_count, total_post_count, organic_post_count, edge_count,
         avg_cluster_size, sync_rate, url_sharing_rate, text_similarity_rate, computed_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
     ON CONFLICT(platform, bucket_start) DO UPDATE SET
        bucket_end = EXCLUDED.bucket_end,
        score = EXCLUDED.score,
        cluster_count = EXCLUDED.cluster_count,
        coordinated_post_count = EXCLUDED.coordinated_post_count,
        total_post_count = EXCLUDED.total_post_count,
        organic_post_count = EXCLUDED.organic_post_count,
        edge_count = EXCLUDED.edge_count,
        avg_cluster_size = EXCLUDED.avg_cluster_size,
        sync_rate = EXCLUDED.sync_rate,
        url_sharing_rate = EXCLUDED.url_sharing_rate,
        text_similarity_rate = EXCLUDED.text_similarity_rate,
        computed_at = EXCLUDED.computed_at";

const UPSERT_CLUSTER: &str = "INSERT INTO coordination_clusters
        (id, platform, bucket_start, community_index, density, edge_count,
         primary_signal, topic, post_count)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
     ON CONFLICT(id) DO UPDATE SET
        platform = EXCLUDED.platform,
        bucket_start = EXCLUDED.bucket_start,
        community_index = EXCLUDED.community_index,
        density = EXCLUDED.density,
        edge_count = EXCLUDED.edge_count,
        primary_signal = EXCLUDED.primary_signal,
        topic = EXCLUDED.topic,
        post_count = EXCLUDED.post_count";

/// Write one cluster and its members inside an open transaction.
async fn write_cluster(
    tx: &mut sqlx_core::transaction::Transaction<'_, Postgres>,
    cluster: &CoordinationCluster,
) -> std::result::Result<(), sqlx_core::Error> {
    sqlx_core::query::query(UPSERT_CLUSTER)
        .bind(&cluster.id)
        .bind(cluster.platform.as_str())
        .bind(cluster.bucket_start)
        .bind(cluster.community_index as i64)
        .bind(cluster.density)
        .bind(cluster.edge_count as i64)
        .bind(cluster.primary_signal.map(|s| s.as_str()))
        .bind(&cluster.topic)
        .bind(cluster.post_count as i64)
        .execute(&mut **tx)
        .await?;

    sqlx_core::query::query("DELETE FROM cluster_members WHERE cluster_id = $1")
        .bind(&cluster.id)
        .execute(&mut **tx)
        .await?;

    for member in &cluster.members {
        sqlx_core::query::query(
            "INSERT INTO cluster_members (cluster_id, account_id, centrality, degree, post_count)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&cluster.id)
        .bind(&member.account_id)
        .bind(member.centrality)
        .bind(member.degree as i64)
        .bind(member.post_count as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn insert_posts(&self, posts: &[Post]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for post in posts {
            sqlx_core::query::query(
                "INSERT INTO posts
                    (platform, id, account_id, content, created_at,
                     likes, reposts, replies, score, parent_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT(platform, id) DO UPDATE SET
                    account_id = EXCLUDED.account_id,
                    content = EXCLUDED.content,
                    created_at = EXCLUDED.created_at,
                    likes = EXCLUDED.likes,
                    reposts = EXCLUDED.reposts,
                    replies = EXCLUDED.replies,
                    score = EXCLUDED.score,
                    parent_id = EXCLUDED.parent_id",
            )
            .bind(post.platform.as_str())
            .bind(&post.id)
            .bind(&post.account_id)
            .bind(&post.content)
            .bind(post.created_at)
            .bind(post.engagement.likes)
            .bind(post.engagement.reposts)
            .bind(post.engagement.replies)
            .bind(post.engagement.score)
            .bind(&post.parent_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(posts.len())
    }

    async fn upsert_accounts(&self, accounts: &[Account]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for account in accounts {
            sqlx_core::query::query(
                "INSERT INTO accounts (platform, id, username)
                 VALUES ($1, $2, $3)
                 ON CONFLICT(platform, id) DO UPDATE SET username = EXCLUDED.username",
            )
            .bind(account.platform.as_str())
            .bind(&account.id)
            .bind(&account.username)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(accounts.len())
    }

    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch> {
        let rows = sqlx_core::query::query(
            "SELECT id, account_id, content, created_at, likes, reposts, replies, score, parent_id
             FROM posts
             WHERE platform = $1 AND created_at >= $2 AND created_at < $3
             ORDER BY created_at, id",
        )
        .bind(platform.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            posts.push(Post {
                id: row.try_get(0)?,
                account_id: row.try_get(1)?,
                platform,
                content: row.try_get(2)?,
                created_at: row.try_get(3)?,
                engagement: Engagement {
                    likes: row.try_get(4)?,
                    reposts: row.try_get(5)?,
                    replies: row.try_get(6)?,
                    score: row.try_get(7)?,
                },
                parent_id: row.try_get(8)?,
            });
        }
        Ok(PostBatch::new(posts))
    }

    async fn get_accounts(&self, platform: Platform) -> Result<Vec<Account>> {
        let rows = sqlx_core::query::query(
            "SELECT id, username FROM accounts WHERE platform = $1 ORDER BY id",
        )
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account {
                id: row.try_get(0)?,
                platform,
                username: row.try_get(1)?,
            });
        }
        Ok(accounts)
    }

    async fn upsert_metric(&self, metric: &CoordinationMetric) -> Result<()> {
        sqlx_core::query::query(UPSERT_METRIC)
            .bind(metric.platform.as_str())
            .bind(metric.bucket_start)
            .bind(metric.bucket_end)
            .bind(metric.score)
            .bind(metric.cluster_count as i64)
            .bind(metric.coordinated_post_count as i64)
            .bind(metric.total_post_count as i64)
            .bind(metric.organic_post_count as i64)
            .bind(metric.edge_count as i64)
            .bind(metric.avg_cluster_size)
            .bind(metric.sync_rate)
            .bind(metric.url_sharing_rate)
            .bind(metric.text_similarity_rate)
            .bind(metric.computed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, metric.platform, metric.bucket_start))?;
        Ok(())
    }

    async fn upsert_cluster(&self, cluster: &CoordinationCluster) -> Result<()> {
        let conflict = |e: sqlx_core::Error| conflict_or(e, cluster.platform, cluster.bucket_start);
        let mut tx = self.pool.begin().await.map_err(conflict)?;
        write_cluster(&mut tx, cluster).await.map_err(conflict)?;
        tx.commit().await.map_err(conflict)?;
        Ok(())
    }

    async fn save_bucket(
        &self,
        metric: &CoordinationMetric,
        clusters: &[CoordinationCluster],
    ) -> Result<()> {
        let conflict = |e: sqlx_core::Error| conflict_or(e, metric.platform, metric.bucket_start);
        let mut tx = self.pool.begin().await.map_err(conflict)?;

        sqlx_core::query::query(UPSERT_METRIC)
            .bind(metric.platform.as_str())
            .bind(metric.bucket_start)
            .bind(metric.bucket_end)
            .bind(metric.score)
            .bind(metric.cluster_count as i64)
            .bind(metric.coordinated_post_count as i64)
            .bind(metric.total_post_count as i64)
            .bind(metric.organic_post_count as i64)
            .bind(metric.edge_count as i64)
            .bind(metric.avg_cluster_size)
            .bind(metric.sync_rate)
            .bind(metric.url_sharing_rate)
            .bind(metric.text_similarity_rate)
            .bind(metric.computed_at)
            .execute(&mut *tx)
            .await
            .map_err(conflict)?;

        // Members go with their clusters (ON DELETE CASCADE)
        sqlx_core::query::query(
            "DELETE FROM coordination_clusters WHERE platform = $1 AND bucket_start = $2",
        )
        .bind(metric.platform.as_str())
        .bind(metric.bucket_start)
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;

        for cluster in clusters {
            write_cluster(&mut tx, cluster).await.map_err(conflict)?;
        }

        tx.commit().await.map_err(conflict)?;
        Ok(())
    }

    async fn get_metric(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<CoordinationMetric>> {
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM coordination_metrics
             WHERE platform = $1 AND bucket_start = $2"
        );
        let row = sqlx_core::query::query(&sql)
            .bind(platform.as_str())
            .bind(bucket_start)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(metric_from_row).transpose()
    }

    async fn get_metrics(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CoordinationMetric>> {
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM coordination_metrics
             WHERE platform = $1 AND bucket_start >= $2 AND bucket_start < $3
             ORDER BY bucket_start"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(platform.as_str())
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(metric_from_row).collect()
    }

    async fn get_clusters(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Vec<CoordinationCluster>> {
        let rows = sqlx_core::query::query(
            "SELECT id, community_index, density, edge_count, primary_signal, topic, post_count
             FROM coordination_clusters
             WHERE platform = $1 AND bucket_start = $2
             ORDER BY community_index",
        )
        .bind(platform.as_str())
        .bind(bucket_start)
        .fetch_all(&self.pool)
        .await?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0)?;
            let member_rows = sqlx_core::query::query(
                "SELECT account_id, centrality, degree, post_count
                 FROM cluster_members
                 WHERE cluster_id = $1
                 ORDER BY centrality DESC, account_id",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;

            let mut members = Vec::with_capacity(member_rows.len());
            for m in member_rows {
                members.push(ClusterMember {
                    account_id: m.try_get(0)?,
                    centrality: m.try_get(1)?,
                    degree: m.try_get::<i64, _>(2)? as usize,
                    post_count: m.try_get::<i64, _>(3)? as usize,
                });
            }

            let primary_signal: Option<String> = row.try_get(4)?;
            clusters.push(CoordinationCluster {
                id,
                platform,
                bucket_start,
                community_index: row.try_get::<i64, _>(1)? as usize,
                density: row.try_get(2)?,
                edge_count: row.try_get::<i64, _>(3)? as usize,
                primary_signal: primary_signal
                    .as_deref()
                    .map(str::parse::<SignalType>)
                    .transpose()?,
                topic: row.try_get(5)?,
                post_count: row.try_get::<i64, _>(6)? as usize,
                members,
            });
        }
        Ok(clusters)
    }

    async fn stored_buckets(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>> {
        let rows = sqlx_core::query::query(
            "SELECT bucket_start FROM coordination_metrics
             WHERE platform = $1 AND bucket_start >= $2 AND bucket_start < $3",
        )
        .bind(platform.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut buckets = BTreeSet::new();
        for row in rows {
            buckets.insert(row.try_get::<DateTime<Utc>, _>(0)?);
        }
        Ok(buckets)
    }

    async fn store_stats(&self) -> Result<StoreStats> {
        let row = sqlx_core::query::query(
            "SELECT
                (SELECT COUNT(*) FROM posts)::bigint,
                (SELECT COUNT(*) FROM accounts)::bigint,
                (SELECT COUNT(*) FROM coordination_metrics)::bigint,
                (SELECT COUNT(*) FROM coordination_clusters)::bigint,
                (SELECT MAX(bucket_start) FROM coordination_metrics),
                (SELECT MAX(computed_at) FROM coordination_metrics)",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            posts: row.try_get(0)?,
            accounts: row.try_get(1)?,
            metrics: row.try_get(2)?,
            clusters: row.try_get(3)?,
            latest_bucket: row.try_get(4)?,
            last_computed_at: row.try_get(5)?,
        })
    }
}
