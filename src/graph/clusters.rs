// Cluster detection: Louvain communities filtered down to coordination clusters.
//
// A community qualifies when it has at least `min_cluster_size` members and
// its edge density reaches `min_cluster_density`. Rejected communities still
// consume a community index, so cluster ids stay stable when thresholds
// change.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::assemble::BucketGraph;
use super::edges::SignalType;
use super::louvain::louvain;
use crate::config::CoordinationConfig;
use crate::db::models::{ClusterMember, CoordinationCluster};
use crate::platforms::{Platform, Post};
use crate::similarity::cluster_topic;

/// Densities within this distance of the minimum count as reaching it.
const DENSITY_TOLERANCE: f64 = 1e-9;

/// Deterministic cluster id: `{platform}_{YYYYMMDD_HHMM}_cluster_{index}`.
///
/// Depends only on its arguments, so re-analysis of a bucket rewrites the
/// same cluster rows.
pub fn cluster_id(platform: Platform, bucket_start: DateTime<Utc>, community_index: usize) -> String {
    format!(
        "{}_{}_cluster_{}",
        platform.as_str(),
        bucket_start.format("%Y%m%d_%H%M"),
        community_index
    )
}

pub struct ClusterDetector<'a> {
    config: &'a CoordinationConfig,
}

impl<'a> ClusterDetector<'a> {
    pub fn new(config: &'a CoordinationConfig) -> Self {
        Self { config }
    }

    /// Whether a community of this size and density is a coordination cluster.
    pub fn qualifies(&self, size: usize, density: f64) -> bool {
        size >= self.config.min_cluster_size
            && density + DENSITY_TOLERANCE >= self.config.min_cluster_density
    }

    /// Detect the qualifying clusters of one bucket graph.
    ///
    /// `posts` are the bucket's posts, used for per-member post counts and the
    /// topic label.
    pub fn detect(
        &self,
        graph: &BucketGraph,
        platform: Platform,
        bucket_start: DateTime<Utc>,
        posts: &[Post],
    ) -> Vec<CoordinationCluster> {
        let communities = louvain(graph, self.config.louvain_resolution);

        let mut posts_by_account: BTreeMap<&str, Vec<&Post>> = BTreeMap::new();
        for post in posts {
            posts_by_account.entry(&post.account_id).or_default().push(post);
        }

        let mut clusters = Vec::new();
        for (index, members) in communities.iter().enumerate() {
            let density = graph.subgraph_density(members);
            if !self.qualifies(members.len(), density) {
                if members.len() > 1 {
                    debug!(
                        community = index,
                        size = members.len(),
                        density,
                        "Community rejected"
                    );
                }
                continue;
            }

            clusters.push(self.build_cluster(
                graph,
                platform,
                bucket_start,
                index,
                members,
                density,
                &posts_by_account,
            ));
        }
        clusters
    }

    #[allow(clippy::too_many_arguments)]
    fn build_cluster(
        &self,
        graph: &BucketGraph,
        platform: Platform,
        bucket_start: DateTime<Utc>,
        index: usize,
        members: &[usize],
        density: f64,
        posts_by_account: &BTreeMap<&str, Vec<&Post>>,
    ) -> CoordinationCluster {
        let member_set: BTreeSet<usize> = members.iter().copied().collect();

        // Weighted strength and degree inside the cluster
        let mut strength: BTreeMap<usize, f64> = BTreeMap::new();
        let mut degree: BTreeMap<usize, usize> = BTreeMap::new();
        let mut signal_counts: BTreeMap<SignalType, usize> = BTreeMap::new();
        let mut edge_count = 0;
        for (a, b, edge) in graph.edge_endpoints() {
            if !(member_set.contains(&a) && member_set.contains(&b)) {
                continue;
            }
            edge_count += 1;
            for node in [a, b] {
                *strength.entry(node).or_default() += edge.weight;
                *degree.entry(node).or_default() += 1;
            }
            for signal in &edge.signals {
                *signal_counts.entry(signal.signal_type).or_default() += 1;
            }
        }
        let max_strength = strength.values().copied().fold(0.0, f64::max);

        let mut cluster_members: Vec<ClusterMember> = members
            .iter()
            .map(|&node| {
                let account_id = graph.account(node).to_string();
                let s = strength.get(&node).copied().unwrap_or(0.0);
                ClusterMember {
                    centrality: if max_strength > 0.0 { s / max_strength } else { 0.0 },
                    degree: degree.get(&node).copied().unwrap_or(0),
                    post_count: posts_by_account
                        .get(account_id.as_str())
                        .map_or(0, |p| p.len()),
                    account_id,
                }
            })
            .collect();
        cluster_members.sort_by(|a, b| {
            b.centrality
                .total_cmp(&a.centrality)
                .then_with(|| a.account_id.cmp(&b.account_id))
        });

        // Most common signal; ties go to the earlier signal type
        let mut primary_signal = None;
        let mut best = 0;
        for signal in SignalType::ALL {
            let count = signal_counts.get(&signal).copied().unwrap_or(0);
            if count > best {
                best = count;
                primary_signal = Some(signal);
            }
        }

        let contents: Vec<String> = cluster_members
            .iter()
            .filter_map(|m| posts_by_account.get(m.account_id.as_str()))
            .flatten()
            .map(|p| p.content.clone())
            .collect();

        CoordinationCluster {
            id: cluster_id(platform, bucket_start, index),
            platform,
            bucket_start,
            community_index: index,
            density,
            edge_count,
            primary_signal,
            topic: cluster_topic(&contents),
            post_count: contents.len(),
            members: cluster_members,
        }
    }
}
