// Similarity signals: text (TF-IDF cosine), shared URLs and shared hashtags.

pub mod extract;
pub mod overlap;
pub mod tfidf;
pub mod topic;

pub use overlap::{hashtag_overlap, url_overlap};
pub use tfidf::{text_similar_pairs, SimilarPair, TextSimilarity, TfIdfModel};
pub use topic::cluster_topic;
