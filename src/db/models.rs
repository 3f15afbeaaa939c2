// Data models: the rows the engine writes and reads back.
//
// These are separate from the backends so the pipeline, scoring and output
// modules can use them without depending on rusqlite or sqlx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::SignalType;
use crate::platforms::Platform;

/// The per-bucket coordination result. Keyed by (platform, bucket_start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMetric {
    pub platform: Platform,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    /// 0.0 to 100.0
    pub score: f64,
    pub cluster_count: usize,
    pub coordinated_post_count: usize,
    pub total_post_count: usize,
    pub organic_post_count: usize,
    pub edge_count: usize,
    pub avg_cluster_size: f64,
    /// Fraction of possible account pairs with synchronized posts
    pub sync_rate: f64,
    pub url_sharing_rate: f64,
    pub text_similarity_rate: f64,
    pub computed_at: DateTime<Utc>,
}

impl CoordinationMetric {
    /// True when every analysis output matches, ignoring when it was computed.
    pub fn same_result(&self, other: &CoordinationMetric) -> bool {
        CoordinationMetric {
            computed_at: other.computed_at,
            ..self.clone()
        } == *other
    }

    pub fn level(&self) -> CoordinationLevel {
        CoordinationLevel::from_score(self.score)
    }
}

/// One account inside a coordination cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub account_id: String,
    /// In-cluster edge strength relative to the strongest member, in (0, 1]
    pub centrality: f64,
    /// Edges to other members
    pub degree: usize,
    pub post_count: usize,
}

/// A qualifying dense community of accounts within one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationCluster {
    /// Derived from (platform, bucket_start, community_index) only
    pub id: String,
    pub platform: Platform,
    pub bucket_start: DateTime<Utc>,
    pub community_index: usize,
    pub density: f64,
    pub edge_count: usize,
    pub primary_signal: Option<SignalType>,
    pub topic: Option<String>,
    pub post_count: usize,
    pub members: Vec<ClusterMember>,
}

impl CoordinationCluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Row counts and freshness for the status view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub posts: i64,
    pub accounts: i64,
    pub metrics: i64,
    pub clusters: i64,
    pub latest_bucket: Option<DateTime<Utc>>,
    pub last_computed_at: Option<DateTime<Utc>>,
}

/// Coarse reading of a coordination score, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinationLevel {
    Low,
    Moderate,
    Elevated,
    High,
}

impl CoordinationLevel {
    /// Determine the level from a coordination score (0-100).
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 75.0 => CoordinationLevel::High,
            s if s >= 50.0 => CoordinationLevel::Elevated,
            s if s >= 25.0 => CoordinationLevel::Moderate,
            _ => CoordinationLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationLevel::Low => "Low",
            CoordinationLevel::Moderate => "Moderate",
            CoordinationLevel::Elevated => "Elevated",
            CoordinationLevel::High => "High",
        }
    }
}

impl std::fmt::Display for CoordinationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
