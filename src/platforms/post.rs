// Normalized post and account types shared by every platform.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Platform;
use crate::similarity::extract::{extract_hashtags, extract_urls};

/// Engagement counters. Platforms fill the ones they have and leave the rest at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub reposts: i64,
    #[serde(default)]
    pub replies: i64,
    /// Hacker News points
    #[serde(default)]
    pub score: i64,
}

/// A single post, immutable once collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub account_id: String,
    pub platform: Platform,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    /// The post this one replies to, if any
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Post {
    /// Normalized URLs mentioned in the content.
    pub fn urls(&self) -> BTreeSet<String> {
        extract_urls(&self.content)
    }

    /// Lowercase hashtags (without `#`) in the content.
    pub fn hashtags(&self) -> BTreeSet<String> {
        extract_hashtags(&self.content)
    }
}

/// An account. Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub platform: Platform,
    pub username: String,
}

/// Posts returned by a source for one time range.
///
/// `malformed` counts records the source had to drop (bad timestamp, missing
/// author); they were logged and skipped, not fatal.
#[derive(Debug, Clone, Default)]
pub struct PostBatch {
    pub posts: Vec<Post>,
    pub malformed: usize,
}

impl PostBatch {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            malformed: 0,
        }
    }
}
