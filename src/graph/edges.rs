// Edge construction: turns per-pair evidence into weighted account edges.
//
// Every signal fires at most once per account pair, no matter how many post
// pairs triggered it, and adds its configured weight to the edge. Only
// distinct accounts are compared; an account never gets an edge to itself.
//
// Signals:
//   synchronized_posting: two posts within the sync window
//   url_sharing         : the same normalized URL in both accounts' posts
//   text_similarity     : TF-IDF cosine above the threshold
//   hashtag_overlap     : one post pair sharing >= min_hashtag_overlap tags
//   reply_pattern       : both accounts replied to the same parent post

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CoordinationConfig, SignalWeights};
use crate::platforms::Post;
use crate::similarity::text_similar_pairs;

/// A kind of evidence that two accounts act together.
///
/// The declaration order is also the tie-break order wherever one signal has
/// to be picked over another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    SynchronizedPosting,
    UrlSharing,
    TextSimilarity,
    HashtagOverlap,
    ReplyPattern,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::SynchronizedPosting,
        SignalType::UrlSharing,
        SignalType::TextSimilarity,
        SignalType::HashtagOverlap,
        SignalType::ReplyPattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::SynchronizedPosting => "synchronized_posting",
            SignalType::UrlSharing => "url_sharing",
            SignalType::TextSimilarity => "text_similarity",
            SignalType::HashtagOverlap => "hashtag_overlap",
            SignalType::ReplyPattern => "reply_pattern",
        }
    }

    /// The configured edge weight for this signal.
    pub fn weight(&self, weights: &SignalWeights) -> f64 {
        match self {
            SignalType::SynchronizedPosting => weights.sync,
            SignalType::UrlSharing => weights.url,
            SignalType::TextSimilarity => weights.text,
            SignalType::HashtagOverlap => weights.hashtag,
            SignalType::ReplyPattern => weights.reply_pattern,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown signal type: {s}"))
    }
}

/// One contributing signal on an edge, kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub weight: f64,
}

/// A weighted, undirected edge between two accounts. `account_a < account_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub account_a: String,
    pub account_b: String,
    /// Sum of the contributing signal weights
    pub weight: f64,
    pub signals: Vec<Signal>,
}

impl Edge {
    pub fn has(&self, signal_type: SignalType) -> bool {
        self.signals.iter().any(|s| s.signal_type == signal_type)
    }
}

/// The edges of one bucket, plus whether the text signal had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    pub edges: Vec<Edge>,
    /// True when too few posts had usable text for TF-IDF
    pub text_similarity_skipped: bool,
}

/// Builds edges for one bucket's posts.
pub struct EdgeBuilder<'a> {
    config: &'a CoordinationConfig,
}

type PairSignals = BTreeMap<(String, String), BTreeSet<SignalType>>;

impl<'a> EdgeBuilder<'a> {
    pub fn new(config: &'a CoordinationConfig) -> Self {
        Self { config }
    }

    /// Evaluate every signal for every pair of accounts in `posts`.
    pub fn build(&self, posts: &[Post]) -> EdgeSet {
        let mut pairs: PairSignals = BTreeMap::new();

        self.synchronized_posting(posts, &mut pairs);
        self.shared_urls(posts, &mut pairs);
        let text_similarity_skipped = self.text_similarity(posts, &mut pairs);
        self.hashtag_overlap(posts, &mut pairs);
        self.reply_pattern(posts, &mut pairs);

        let weights = &self.config.signal_weights;
        let edges: Vec<Edge> = pairs
            .into_iter()
            .filter_map(|((account_a, account_b), types)| {
                let signals: Vec<Signal> = types
                    .into_iter()
                    .map(|t| Signal {
                        signal_type: t,
                        weight: t.weight(weights),
                    })
                    .collect();
                let weight: f64 = signals.iter().map(|s| s.weight).sum();
                (weight > 0.0).then_some(Edge {
                    account_a,
                    account_b,
                    weight,
                    signals,
                })
            })
            .collect();

        debug!(
            posts = posts.len(),
            edges = edges.len(),
            text_similarity_skipped,
            "Built bucket edges"
        );

        EdgeSet {
            edges,
            text_similarity_skipped,
        }
    }

    /// Posts from different accounts within the sync window of each other.
    ///
    /// Sorting by time lets each post stop scanning at the first later post
    /// outside the window.
    fn synchronized_posting(&self, posts: &[Post], pairs: &mut PairSignals) {
        // Compared at full precision: 90.001 s is outside a 90 s window
        let window = Duration::try_seconds(self.config.sync_window_seconds).unwrap_or(Duration::MAX);
        let mut order: Vec<&Post> = posts.iter().collect();
        order.sort_by_key(|p| p.created_at);

        for (i, earlier) in order.iter().enumerate() {
            for later in &order[i + 1..] {
                if later.created_at - earlier.created_at > window {
                    break;
                }
                mark(pairs, &earlier.account_id, &later.account_id, SignalType::SynchronizedPosting);
            }
        }
    }

    /// Accounts whose posts link the same normalized URL.
    fn shared_urls(&self, posts: &[Post], pairs: &mut PairSignals) {
        let mut by_url: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for post in posts {
            for url in post.urls() {
                by_url.entry(url).or_default().insert(&post.account_id);
            }
        }
        for accounts in by_url.values() {
            mark_all(pairs, accounts, SignalType::UrlSharing);
        }
    }

    /// Near-duplicate text across accounts. Returns true when the signal was
    /// skipped for lack of usable documents.
    fn text_similarity(&self, posts: &[Post], pairs: &mut PairSignals) -> bool {
        let result = text_similar_pairs(posts, self.config.text_similarity_threshold);
        if result.is_skipped() {
            debug!(posts = posts.len(), "Too few usable documents, text similarity skipped");
            return true;
        }
        for pair in result.pairs() {
            mark(
                pairs,
                &posts[pair.a].account_id,
                &posts[pair.b].account_id,
                SignalType::TextSimilarity,
            );
        }
        false
    }

    /// Post pairs sharing at least `min_hashtag_overlap` hashtags.
    ///
    /// Shared-tag counts are accumulated through a tag-to-posts index so posts
    /// without tags are never compared.
    fn hashtag_overlap(&self, posts: &[Post], pairs: &mut PairSignals) {
        let min_overlap = self.config.min_hashtag_overlap;
        let mut by_tag: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, post) in posts.iter().enumerate() {
            let tags = post.hashtags();
            if tags.len() < min_overlap {
                continue;
            }
            for tag in tags {
                by_tag.entry(tag).or_default().push(i);
            }
        }

        let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
        for indices in by_tag.values() {
            for (x, &i) in indices.iter().enumerate() {
                for &j in &indices[x + 1..] {
                    if posts[i].account_id != posts[j].account_id {
                        *shared.entry((i, j)).or_default() += 1;
                    }
                }
            }
        }

        for ((i, j), count) in shared {
            if count >= min_overlap {
                mark(pairs, &posts[i].account_id, &posts[j].account_id, SignalType::HashtagOverlap);
            }
        }
    }

    /// Accounts replying to the same parent post.
    fn reply_pattern(&self, posts: &[Post], pairs: &mut PairSignals) {
        let mut by_parent: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for post in posts {
            if let Some(parent) = post.parent_id.as_deref() {
                by_parent.entry(parent).or_default().insert(&post.account_id);
            }
        }
        for accounts in by_parent.values() {
            mark_all(pairs, accounts, SignalType::ReplyPattern);
        }
    }
}

/// Record a signal for an account pair, ordering the pair. Same-account pairs
/// are ignored.
fn mark(pairs: &mut PairSignals, a: &str, b: &str, signal: SignalType) {
    if a == b {
        return;
    }
    let key = if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    };
    pairs.entry(key).or_default().insert(signal);
}

/// Record a signal for every pair within a set of accounts.
fn mark_all(pairs: &mut PairSignals, accounts: &BTreeSet<&str>, signal: SignalType) {
    let accounts: Vec<&str> = accounts.iter().copied().collect();
    for (i, a) in accounts.iter().enumerate() {
        for b in &accounts[i + 1..] {
            mark(pairs, a, b, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{Engagement, Platform};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn post(id: &str, account: &str, offset_secs: i64, content: &str) -> Post {
        Post {
            id: id.to_string(),
            account_id: account.to_string(),
            platform: Platform::Bluesky,
            content: content.to_string(),
            created_at: base() + Duration::seconds(offset_secs),
            engagement: Engagement::default(),
            parent_id: None,
        }
    }

    fn reply(id: &str, account: &str, offset_secs: i64, parent: &str) -> Post {
        Post {
            parent_id: Some(parent.to_string()),
            ..post(id, account, offset_secs, "agreed")
        }
    }

    fn post_at_millis(id: &str, account: &str, offset_millis: i64, content: &str) -> Post {
        Post {
            created_at: base() + Duration::milliseconds(offset_millis),
            ..post(id, account, 0, content)
        }
    }

    #[test]
    fn test_sync_window_boundary_is_exact() {
        let config = CoordinationConfig::default();
        let builder = EdgeBuilder::new(&config);
        let first = post_at_millis("1", "alice", 0, "Baked sourdough bread this morning");

        let inside = post_at_millis("2", "bob", 90_000, "The river trail flooded after the storm");
        let set = builder.build(&[first.clone(), inside]);
        assert_eq!(set.edges.len(), 1, "90.000 s apart is synchronized");
        assert!(set.edges[0].has(SignalType::SynchronizedPosting));

        for offset in [90_001, 90_900] {
            let outside =
                post_at_millis("2", "bob", offset, "The river trail flooded after the storm");
            let set = builder.build(&[first.clone(), outside]);
            assert!(set.edges.is_empty(), "{offset} ms apart is outside the window");
        }
    }

    #[test]
    fn test_sync_and_url_combine_to_two_and_a_half() {
        let config = CoordinationConfig::default();
        let posts = vec![
            post("1", "alice", 0, "breaking https://example.com/story"),
            post("2", "bob", 45, "read https://example.com/story now"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert_eq!(set.edges.len(), 1);
        let edge = &set.edges[0];
        assert_eq!((edge.account_a.as_str(), edge.account_b.as_str()), ("alice", "bob"));
        assert!((edge.weight - 2.5).abs() < 1e-9, "weight was {}", edge.weight);
        assert!(edge.has(SignalType::SynchronizedPosting));
        assert!(edge.has(SignalType::UrlSharing));
        assert_eq!(edge.signals.len(), 2);
    }

    #[test]
    fn test_sync_window_is_inclusive() {
        let config = CoordinationConfig::default();
        let posts = vec![
            post("1", "a", 0, "first"),
            post("2", "b", 90, "second"),
            post("3", "c", 181, "third"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert_eq!(set.edges.len(), 1);
        assert_eq!(set.edges[0].account_b, "b");
    }

    #[test]
    fn test_signal_counted_once_per_pair() {
        let config = CoordinationConfig::default();
        let posts = vec![
            post("1", "a", 0, "one"),
            post("2", "a", 10, "two"),
            post("3", "b", 20, "three"),
            post("4", "b", 30, "four"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert_eq!(set.edges.len(), 1);
        assert!((set.edges[0].weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_account_never_linked() {
        let config = CoordinationConfig::default();
        let posts = vec![
            post("1", "a", 0, "https://example.com/x #one #two"),
            post("2", "a", 5, "https://example.com/x #one #two"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert!(set.edges.is_empty());
    }

    #[test]
    fn test_hashtag_overlap_needs_two_tags_on_one_post_pair() {
        let config = CoordinationConfig::default();
        let posts = vec![
            post("1", "a", 0, "#vote #rigged"),
            post("2", "b", 600, "#vote #rigged #now"),
            post("3", "c", 1200, "#vote today"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert_eq!(set.edges.len(), 1);
        let edge = &set.edges[0];
        assert_eq!((edge.account_a.as_str(), edge.account_b.as_str()), ("a", "b"));
        assert!(edge.has(SignalType::HashtagOverlap));
        assert!((edge.weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reply_pattern() {
        let config = CoordinationConfig::default();
        let posts = vec![
            reply("1", "a", 0, "target"),
            reply("2", "b", 1000, "target"),
            reply("3", "c", 2000, "elsewhere"),
        ];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert_eq!(set.edges.len(), 1);
        assert!(set.edges[0].has(SignalType::ReplyPattern));
        assert!((set.edges[0].weight - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_signal_produces_no_edge() {
        let mut config = CoordinationConfig::default();
        config.signal_weights.sync = 0.0;
        let posts = vec![post("1", "a", 0, "hi"), post("2", "b", 1, "yo")];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert!(set.edges.is_empty());
    }

    #[test]
    fn test_text_skipped_flag() {
        let config = CoordinationConfig::default();
        let posts = vec![post("1", "a", 0, "ok"), post("2", "b", 1000, "fine")];
        let set = EdgeBuilder::new(&config).build(&posts);
        assert!(set.text_similarity_skipped);
    }

    #[test]
    fn test_signal_type_round_trips_through_str() {
        for t in SignalType::ALL {
            assert_eq!(t.as_str().parse::<SignalType>().unwrap(), t);
        }
        assert!("telepathy".parse::<SignalType>().is_err());
    }
}
