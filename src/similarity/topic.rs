// Topic label for a cluster, from the keywords of its members' posts.
//
// Uses the `keyword_extraction` TF-IDF ranker with each post as a document, so
// words every member repeats rank above incidental ones. The label is the top
// three keywords joined with " / ".

use keyword_extraction::tf_idf::{TfIdf, TfIdfParams};
use stop_words::{get, LANGUAGE};

use super::extract::normalize_text;

/// How many keywords make up a label.
const LABEL_KEYWORDS: usize = 3;

/// Summarize a cluster's posts as a short keyword label.
///
/// Returns None when the posts carry no usable words (all links, tags or stop
/// words).
pub fn cluster_topic(contents: &[String]) -> Option<String> {
    let docs: Vec<String> = contents
        .iter()
        .map(|c| normalize_text(c))
        .filter(|d| !d.is_empty())
        .collect();
    if docs.is_empty() {
        return None;
    }

    let stop_words: Vec<String> = get(LANGUAGE::English);
    let params = TfIdfParams::UnprocessedDocuments(&docs, &stop_words, None);
    let tfidf = TfIdf::new(params);

    let ranked: Vec<(String, f32)> = tfidf.get_ranked_word_scores(LABEL_KEYWORDS);
    if ranked.is_empty() {
        return None;
    }

    let words: Vec<&str> = ranked.iter().map(|(w, _)| w.as_str()).collect();
    Some(words.join(" / "))
}
