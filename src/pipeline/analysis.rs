// Per-bucket analysis: posts in, one metric row and its clusters out.
//
// Pure function of the bucket's posts and the configuration. Nothing here
// touches the store or the clock except `computed_at`, which identity
// comparisons ignore.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::db::{CoordinationCluster, CoordinationMetric};
use crate::graph::{BucketGraph, ClusterDetector, SignalType};
use crate::platforms::{Platform, Post, PostBatch};
use crate::scoring::{compute_coordination_score, pair_rate, ScoreBreakdown, ScoreInputs};

/// A non-fatal condition the bucket was analyzed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// Nothing was posted in the bucket; it is scored 0 and still stored.
    NoPosts,
    /// Fewer than two usable documents, so text similarity was not computed.
    TextSimilarityDisabled,
    /// Posts dropped as malformed (by the source or by sanitizing).
    PostsSkipped(usize),
    /// Only the earliest `kept` of `total` posts went into the graph.
    Capped { kept: usize, total: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::NoPosts => write!(f, "no posts"),
            Degradation::TextSimilarityDisabled => write!(f, "text similarity disabled"),
            Degradation::PostsSkipped(n) => write!(f, "{n} malformed posts skipped"),
            Degradation::Capped { kept, total } => {
                write!(f, "sampled {kept} of {total} posts")
            }
        }
    }
}

/// Everything computed for one bucket.
#[derive(Debug, Clone)]
pub struct BucketAnalysis {
    pub metric: CoordinationMetric,
    pub clusters: Vec<CoordinationCluster>,
    pub breakdown: ScoreBreakdown,
    pub degradations: Vec<Degradation>,
}

impl BucketAnalysis {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Analyze one bucket `[bucket_start, bucket_end)`.
///
/// Posts outside the bucket, posts without an author and repeated post ids
/// are dropped and reported as `Degradation::PostsSkipped`.
pub fn analyze_bucket(
    platform: Platform,
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
    batch: PostBatch,
    config: &CoordinationConfig,
) -> BucketAnalysis {
    let mut degradations = Vec::new();

    let (mut posts, dropped) = sanitize(batch.posts, platform, bucket_start, bucket_end);
    let skipped = batch.malformed + dropped;
    if skipped > 0 {
        warn!(
            platform = %platform,
            bucket = %bucket_start,
            skipped,
            "Skipped malformed posts"
        );
        degradations.push(Degradation::PostsSkipped(skipped));
    }

    if posts.is_empty() {
        debug!(platform = %platform, bucket = %bucket_start, "Empty bucket");
        degradations.push(Degradation::NoPosts);
        return BucketAnalysis {
            metric: empty_metric(platform, bucket_start, bucket_end),
            clusters: Vec::new(),
            breakdown: ScoreBreakdown::default(),
            degradations,
        };
    }

    posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    let total_post_count = posts.len();
    let sample = if total_post_count > config.max_posts_per_bucket {
        warn!(
            platform = %platform,
            bucket = %bucket_start,
            total = total_post_count,
            kept = config.max_posts_per_bucket,
            "Bucket over post cap, analyzing earliest posts only"
        );
        degradations.push(Degradation::Capped {
            kept: config.max_posts_per_bucket,
            total: total_post_count,
        });
        &posts[..config.max_posts_per_bucket]
    } else {
        &posts[..]
    };

    let graph = BucketGraph::assemble(sample, config);
    if graph.text_similarity_skipped() {
        debug!(platform = %platform, bucket = %bucket_start, "Text similarity disabled");
        degradations.push(Degradation::TextSimilarityDisabled);
    }

    let clusters = ClusterDetector::new(config).detect(&graph, platform, bucket_start, sample);

    // Every post by a cluster member counts as coordinated, sampled or not
    let members: HashSet<&str> = clusters
        .iter()
        .flat_map(|c| c.members.iter().map(|m| m.account_id.as_str()))
        .collect();
    let coordinated_post_count = posts
        .iter()
        .filter(|p| members.contains(p.account_id.as_str()))
        .count();

    let account_count = graph.node_count();
    let breakdown = compute_coordination_score(
        &ScoreInputs {
            coordinated_post_count,
            total_post_count,
            cluster_densities: clusters.iter().map(|c| c.density).collect(),
            synchronized_pairs: graph.synchronized_pair_count(),
            account_count,
        },
        &config.score_weights,
    );

    let avg_cluster_size = if clusters.is_empty() {
        0.0
    } else {
        clusters.iter().map(|c| c.size()).sum::<usize>() as f64 / clusters.len() as f64
    };

    let metric = CoordinationMetric {
        platform,
        bucket_start,
        bucket_end,
        score: breakdown.score,
        cluster_count: clusters.len(),
        coordinated_post_count,
        total_post_count,
        organic_post_count: total_post_count - coordinated_post_count,
        edge_count: graph.edge_count(),
        avg_cluster_size,
        sync_rate: breakdown.sync_rate,
        url_sharing_rate: pair_rate(graph.signal_pair_count(SignalType::UrlSharing), account_count),
        text_similarity_rate: pair_rate(
            graph.signal_pair_count(SignalType::TextSimilarity),
            account_count,
        ),
        computed_at: Utc::now(),
    };

    info!(
        platform = %platform,
        bucket = %bucket_start,
        posts = total_post_count,
        accounts = account_count,
        edges = metric.edge_count,
        clusters = metric.cluster_count,
        score = metric.score,
        "Bucket analyzed"
    );

    BucketAnalysis {
        metric,
        clusters,
        breakdown,
        degradations,
    }
}

/// Drop posts that can't take part in the graph. Returns the kept posts and
/// how many were dropped.
fn sanitize(
    posts: Vec<Post>,
    platform: Platform,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (Vec<Post>, usize) {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut kept = Vec::with_capacity(posts.len());
    let mut dropped = 0;

    for post in posts {
        let reason = if post.account_id.trim().is_empty() {
            Some("missing account id")
        } else if post.platform != platform {
            Some("wrong platform")
        } else if post.created_at < start || post.created_at >= end {
            Some("outside bucket")
        } else if !seen.insert(post.id.clone()) {
            Some("duplicate id")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(post_id = %post.id, reason, "Dropping post");
                dropped += 1;
            }
            None => kept.push(post),
        }
    }
    (kept, dropped)
}

fn empty_metric(
    platform: Platform,
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
) -> CoordinationMetric {
    CoordinationMetric {
        platform,
        bucket_start,
        bucket_end,
        score: 0.0,
        cluster_count: 0,
        coordinated_post_count: 0,
        total_post_count: 0,
        organic_post_count: 0,
        edge_count: 0,
        avg_cluster_size: 0.0,
        sync_rate: 0.0,
        url_sharing_rate: 0.0,
        text_similarity_rate: 0.0,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::Engagement;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn post(id: &str, account: &str, secs: i64, content: &str) -> Post {
        Post {
            id: id.to_string(),
            account_id: account.to_string(),
            platform: Platform::Bluesky,
            content: content.to_string(),
            created_at: start() + Duration::seconds(secs),
            engagement: Engagement::default(),
            parent_id: None,
        }
    }

    fn analyze(posts: Vec<Post>, config: &CoordinationConfig) -> BucketAnalysis {
        analyze_bucket(
            Platform::Bluesky,
            start(),
            start() + Duration::hours(1),
            PostBatch::new(posts),
            config,
        )
    }

    #[test]
    fn test_empty_bucket_scores_zero() {
        let result = analyze(Vec::new(), &CoordinationConfig::default());
        assert_eq!(result.metric.score, 0.0);
        assert_eq!(result.metric.total_post_count, 0);
        assert!(result.clusters.is_empty());
        assert_eq!(result.degradations, vec![Degradation::NoPosts]);
    }

    #[test]
    fn test_sanitize_drops_bad_posts() {
        let posts = vec![
            post("1", "alice", 10, "hello there"),
            post("2", "", 20, "no author"),
            post("1", "alice", 30, "duplicate id"),
            post("3", "bob", 3600, "next bucket"),
        ];
        let result = analyze(posts, &CoordinationConfig::default());
        assert_eq!(result.metric.total_post_count, 1);
        assert!(result.degradations.contains(&Degradation::PostsSkipped(3)));
    }

    #[test]
    fn test_source_malformed_count_is_reported() {
        let batch = PostBatch {
            posts: vec![post("1", "alice", 10, "hello there")],
            malformed: 2,
        };
        let result = analyze_bucket(
            Platform::Bluesky,
            start(),
            start() + Duration::hours(1),
            batch,
            &CoordinationConfig::default(),
        );
        assert!(result.degradations.contains(&Degradation::PostsSkipped(2)));
    }

    #[test]
    fn test_single_post_disables_text_similarity() {
        let result = analyze(
            vec![post("1", "alice", 10, "just one post in this bucket")],
            &CoordinationConfig::default(),
        );
        assert!(result.degradations.contains(&Degradation::TextSimilarityDisabled));
        assert_eq!(result.metric.score, 0.0);
    }

    #[test]
    fn test_cap_keeps_total_count() {
        let config = CoordinationConfig {
            max_posts_per_bucket: 3,
            ..CoordinationConfig::default()
        };
        let posts: Vec<Post> = (0..5)
            .map(|i| post(&format!("p{i}"), &format!("acct{i}"), i * 600, "unrelated words"))
            .collect();
        let result = analyze(posts, &config);
        assert_eq!(result.metric.total_post_count, 5);
        assert!(result
            .degradations
            .contains(&Degradation::Capped { kept: 3, total: 5 }));
    }

    #[test]
    fn test_coordinated_triangle_is_one_cluster() {
        let text = "Everyone needs to read this important announcement about the election today";
        let mut posts = vec![
            post("a1", "alice", 0, text),
            post("b1", "bob", 30, text),
            post("c1", "carol", 60, text),
        ];
        let organic = [
            "Baked sourdough bread this morning with rye flour",
            "The river trail was flooded after yesterday's storm",
            "Finally finished reading that long Russian novel",
            "Our team lost the hockey game in overtime again",
            "Learning to play jazz piano chords on weekends",
        ];
        for (i, content) in organic.iter().enumerate() {
            posts.push(post(
                &format!("o{i}"),
                &format!("organic{i}"),
                600 + i as i64 * 300,
                content,
            ));
        }
        let result = analyze(posts, &CoordinationConfig::default());

        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].size(), 3);
        assert_eq!(result.metric.coordinated_post_count, 3);
        assert_eq!(result.metric.organic_post_count, 5);
        assert!(result.metric.score > 0.0 && result.metric.score <= 100.0);
    }
}
