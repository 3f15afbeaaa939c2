// Post source trait: where the engine gets a bucket's posts from.
//
// Like the Database trait, this lets the analysis pipeline run against the
// persistent store in production and against a fixed post list in tests or
// one-shot runs, without the pipeline knowing which.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::post::{Post, PostBatch};
use super::Platform;
use crate::db::Database;

/// Trait for fetching posts created in `[start, end)` on one platform.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Posts ordered by creation time. Records that can't be normalized are
    /// dropped and counted in `PostBatch::malformed`.
    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch>;
}

/// Reads posts the collectors already wrote to the store.
pub struct StoredPosts {
    db: Arc<dyn Database>,
}

impl StoredPosts {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostSource for StoredPosts {
    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch> {
        self.db.get_posts(platform, start, end).await
    }
}

/// A fixed, in-memory post list.
pub struct MemoryPosts {
    posts: Vec<Post>,
}

impl MemoryPosts {
    pub fn new(posts: Vec<Post>) -> Self {
        Self { posts }
    }
}

#[async_trait]
impl PostSource for MemoryPosts {
    async fn get_posts(
        &self,
        platform: Platform,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PostBatch> {
        let mut posts: Vec<Post> = self
            .posts
            .iter()
            .filter(|p| p.platform == platform && p.created_at >= start && p.created_at < end)
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(PostBatch::new(posts))
    }
}
