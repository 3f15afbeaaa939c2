// Database trait: backend-agnostic async interface for the metrics store.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{CoordinationCluster, CoordinationMetric, StoreStats};
use crate::platforms::{Account, Platform, Post, PostBatch};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Posts and accounts ---

    /// Insert or update posts, keyed by (platform, id). Returns rows written.
    async fn insert_posts(&self, posts: &[Post]) -> Result<usize>;

    /// Insert or update accounts, keyed by (platform, id).
    async fn upsert_accounts(&self, accounts: &[Account]) -> Result<usize>;

    /// Posts with `start <= created_at < end`, ordered by (created_at, id).
    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch>;

    async fn get_accounts(&self, platform: Platform) -> Result<Vec<Account>>;

    // --- Coordination metrics ---

    /// Insert or replace the metric row for (platform, bucket_start).
    async fn upsert_metric(&self, metric: &CoordinationMetric) -> Result<()>;

    /// Insert or replace one cluster and its members.
    async fn upsert_cluster(&self, cluster: &CoordinationCluster) -> Result<()>;

    /// Atomically upsert a bucket's metric and replace its clusters.
    ///
    /// Lock contention surfaces as `CoordinationError::PersistenceConflict`.
    async fn save_bucket(
        &self,
        metric: &CoordinationMetric,
        clusters: &[CoordinationCluster],
    ) -> Result<()>;

    async fn get_metric(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<CoordinationMetric>>;

    /// Metrics with `start <= bucket_start < end`, oldest first.
    async fn get_metrics(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CoordinationMetric>>;

    /// Clusters of one bucket, in community order.
    async fn get_clusters(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Vec<CoordinationCluster>>;

    /// Bucket starts already stored in `[start, end)` (for resume).
    async fn stored_buckets(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>>;

    // --- Status ---

    async fn store_stats(&self) -> Result<StoreStats>;
}
