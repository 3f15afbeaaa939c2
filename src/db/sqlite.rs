// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{CoordinationCluster, CoordinationMetric, StoreStats};
use super::queries;
use super::traits::Database;
use crate::platforms::{Account, Platform, Post, PostBatch};

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// In-memory database with the schema applied. Used by tests and
    /// one-shot runs that don't need to persist anything.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn insert_posts(&self, posts: &[Post]) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        queries::insert_posts(&mut conn, posts)
    }

    async fn upsert_accounts(&self, accounts: &[Account]) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        queries::upsert_accounts(&mut conn, accounts)
    }

    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch> {
        let conn = self.conn.lock().await;
        queries::get_posts(&conn, platform, start, end)
    }

    async fn get_accounts(&self, platform: Platform) -> Result<Vec<Account>> {
        let conn = self.conn.lock().await;
        queries::get_accounts(&conn, platform)
    }

    async fn upsert_metric(&self, metric: &CoordinationMetric) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_metric(&conn, metric)
    }

    async fn upsert_cluster(&self, cluster: &CoordinationCluster) -> Result<()> {
        let mut conn = self.conn.lock().await;
        queries::upsert_cluster(&mut conn, cluster)
    }

    async fn save_bucket(
        &self,
        metric: &CoordinationMetric,
        clusters: &[CoordinationCluster],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        queries::save_bucket(&mut conn, metric, clusters)
    }

    async fn get_metric(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<CoordinationMetric>> {
        let conn = self.conn.lock().await;
        queries::get_metric(&conn, platform, bucket_start)
    }

    async fn get_metrics(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CoordinationMetric>> {
        let conn = self.conn.lock().await;
        queries::get_metrics(&conn, platform, start, end)
    }

    async fn get_clusters(
        &self,
        platform: Platform,
        bucket_start: DateTime<Utc>,
    ) -> Result<Vec<CoordinationCluster>> {
        let conn = self.conn.lock().await;
        queries::get_clusters(&conn, platform, bucket_start)
    }

    async fn stored_buckets(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        queries::stored_buckets(&conn, platform, start, end)
    }

    async fn store_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        queries::store_stats(&conn)
    }
}
