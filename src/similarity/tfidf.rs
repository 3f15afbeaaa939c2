// TF-IDF vectors and cosine similarity over one bucket's posts.
//
// Each post is a document. Content is normalized (no URLs, hashtags or
// mentions), tokenized into alphanumeric words of 2+ characters, English stop
// words are dropped, and unigrams plus bigrams become terms. IDF is smoothed:
//
//   idf(t) = ln((1 + n) / (1 + df(t))) + 1
//
// Vectors are L2-normalized, so cosine similarity is a sparse dot product.
// Near-duplicate copy-paste campaigns land close to 1.0; unrelated posts that
// share a common word or two stay far below the 0.8 default threshold.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use stop_words::{get, LANGUAGE};

use super::extract::normalize_text;
use crate::platforms::Post;

/// Normalized documents shorter than this are too thin to compare.
pub const MIN_TEXT_LENGTH: usize = 10;

/// Vocabulary cap, by corpus frequency.
pub const MAX_FEATURES: usize = 5000;

fn stop_word_set() -> &'static HashSet<String> {
    static SET: OnceLock<HashSet<String>> = OnceLock::new();
    SET.get_or_init(|| get(LANGUAGE::English).into_iter().collect())
}

/// A sparse, L2-normalized vector: (term index, weight), sorted by index.
type SparseVector = Vec<(usize, f64)>;

/// Fitted TF-IDF vectors for a set of documents.
pub struct TfIdfModel {
    vectors: Vec<SparseVector>,
    vocabulary_size: usize,
}

impl TfIdfModel {
    /// Fit TF-IDF over already-normalized documents.
    ///
    /// Returns None when fewer than two documents contain any term; there is
    /// nothing to compare.
    pub fn fit(docs: &[String]) -> Option<Self> {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| terms(d)).collect();

        let usable = tokenized.iter().filter(|t| !t.is_empty()).count();
        if usable < 2 {
            return None;
        }

        // Corpus frequency and document frequency per term
        let mut corpus_freq: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc_terms in &tokenized {
            let mut seen: HashSet<&str> = HashSet::new();
            for term in doc_terms {
                *corpus_freq.entry(term.as_str()).or_default() += 1;
                if seen.insert(term.as_str()) {
                    *doc_freq.entry(term.as_str()).or_default() += 1;
                }
            }
        }

        // Keep the most frequent terms; ties broken alphabetically so the
        // vocabulary is the same on every run.
        let mut ranked: Vec<(&str, usize)> = corpus_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(MAX_FEATURES);

        let mut vocabulary: Vec<&str> = ranked.into_iter().map(|(t, _)| t).collect();
        vocabulary.sort_unstable();
        let index: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, i))
            .collect();

        let n = docs.len() as f64;
        let idf: Vec<f64> = vocabulary
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        let vectors = tokenized
            .iter()
            .map(|doc_terms| {
                let mut tf: HashMap<usize, f64> = HashMap::new();
                for term in doc_terms {
                    if let Some(&i) = index.get(term.as_str()) {
                        *tf.entry(i).or_default() += 1.0;
                    }
                }
                let mut vector: SparseVector =
                    tf.into_iter().map(|(i, count)| (i, count * idf[i])).collect();
                vector.sort_unstable_by_key(|(i, _)| *i);

                let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in &mut vector {
                        *w /= norm;
                    }
                }
                vector
            })
            .collect();

        Some(Self {
            vectors,
            vocabulary_size: vocabulary.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary_size
    }

    /// Cosine similarity between documents `i` and `j` (0.0 to 1.0).
    pub fn cosine(&self, i: usize, j: usize) -> f64 {
        let (a, b) = (&self.vectors[i], &self.vectors[j]);
        let (mut x, mut y) = (0, 0);
        let mut dot = 0.0;
        while x < a.len() && y < b.len() {
            match a[x].0.cmp(&b[y].0) {
                std::cmp::Ordering::Less => x += 1,
                std::cmp::Ordering::Greater => y += 1,
                std::cmp::Ordering::Equal => {
                    dot += a[x].1 * b[y].1;
                    x += 1;
                    y += 1;
                }
            }
        }
        dot.clamp(0.0, 1.0)
    }
}

/// Split a normalized document into unigram and bigram terms.
///
/// Stop words are removed before bigrams are formed, so "the vote is rigged"
/// yields `vote`, `rigged` and `vote rigged`.
fn terms(doc: &str) -> Vec<String> {
    let stop = stop_word_set();
    let words: Vec<&str> = doc
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2 && !stop.contains(*w))
        .collect();

    let mut out: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    out.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    out
}

/// A post pair whose text similarity cleared the threshold. Indexes refer to
/// the slice passed to `text_similar_pairs`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarPair {
    pub a: usize,
    pub b: usize,
    pub score: f64,
}

/// Outcome of the text-similarity pass over a bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSimilarity {
    /// Fewer than two usable documents; the signal is off for this bucket.
    Skipped { usable_docs: usize },
    Pairs(Vec<SimilarPair>),
}

impl TextSimilarity {
    pub fn pairs(&self) -> &[SimilarPair] {
        match self {
            TextSimilarity::Skipped { .. } => &[],
            TextSimilarity::Pairs(pairs) => pairs,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TextSimilarity::Skipped { .. })
    }
}

/// Find cross-account post pairs with cosine similarity above `threshold`.
pub fn text_similar_pairs(posts: &[Post], threshold: f64) -> TextSimilarity {
    // Keep only posts with enough text, remembering their original index
    let (indices, docs): (Vec<usize>, Vec<String>) = posts
        .iter()
        .enumerate()
        .map(|(i, p)| (i, normalize_text(&p.content)))
        .filter(|(_, d)| d.chars().count() >= MIN_TEXT_LENGTH)
        .unzip();

    let Some(model) = TfIdfModel::fit(&docs) else {
        return TextSimilarity::Skipped {
            usable_docs: docs.len(),
        };
    };

    let mut pairs = Vec::new();
    for x in 0..model.len() {
        for y in (x + 1)..model.len() {
            let (a, b) = (indices[x], indices[y]);
            if posts[a].account_id == posts[b].account_id {
                continue;
            }
            let score = model.cosine(x, y);
            if score > threshold {
                pairs.push(SimilarPair { a, b, score });
            }
        }
    }

    TextSimilarity::Pairs(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{Engagement, Platform};
    use chrono::{TimeZone, Utc};

    fn post(id: &str, account: &str, content: &str) -> Post {
        Post {
            id: id.to_string(),
            account_id: account.to_string(),
            platform: Platform::Bluesky,
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            engagement: Engagement::default(),
            parent_id: None,
        }
    }

    #[test]
    fn test_identical_documents_score_one() {
        let docs = vec![
            "the ballots were shredded overnight in county offices".to_string(),
            "the ballots were shredded overnight in county offices".to_string(),
            "my cat learned to open the fridge door today".to_string(),
        ];
        let model = TfIdfModel::fit(&docs).unwrap();
        assert!((model.cosine(0, 1) - 1.0).abs() < 1e-9);
        assert!(model.cosine(0, 2) < 0.1);
    }

    #[test]
    fn test_fit_needs_two_documents() {
        assert!(TfIdfModel::fit(&["only one document here".to_string()]).is_none());
        // Stop words only, no terms survive
        assert!(TfIdfModel::fit(&["the and of".to_string(), "real words here".to_string()]).is_none());
    }

    #[test]
    fn test_bigrams_skip_stop_words() {
        let t = terms("the vote is rigged");
        assert!(t.contains(&"vote".to_string()));
        assert!(t.contains(&"vote rigged".to_string()));
        assert!(!t.iter().any(|w| w.starts_with("the")));
    }

    #[test]
    fn test_similar_pairs_skip_same_account() {
        let posts = vec![
            post("1", "a", "Everyone must see this shocking report on the dam failure"),
            post("2", "a", "Everyone must see this shocking report on the dam failure"),
            post("3", "b", "Everyone must see this SHOCKING report on the dam failure!!"),
        ];
        let result = text_similar_pairs(&posts, 0.8);
        let pairs = result.pairs();
        assert_eq!(pairs.len(), 2, "got {pairs:?}");
        assert!(pairs.iter().all(|p| posts[p.a].account_id != posts[p.b].account_id));
    }

    #[test]
    fn test_short_documents_disable_signal() {
        let posts = vec![
            post("1", "a", "ok"),
            post("2", "b", "#tag https://example.com"),
            post("3", "c", "a longer post about something"),
        ];
        let result = text_similar_pairs(&posts, 0.8);
        assert_eq!(result, TextSimilarity::Skipped { usable_docs: 1 });
        assert!(result.pairs().is_empty());
    }
}
