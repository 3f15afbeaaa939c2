// URL, hashtag and plain-text extraction from post content.
//
// URLs are compared by exact normalized string, so normalization here decides
// what counts as "the same link": trailing punctuation is trimmed, scheme and
// host are lowercased, path and query are kept as-is, fragments are dropped.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::Regex;

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s<>"{}|\\^`\[\]]+"#).expect("valid URL regex")
    })
}

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\w&])#(\w+)").expect("valid hashtag regex"))
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[\w.\-]+").expect("valid mention regex"))
}

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', '\'', '"', ']'];

/// Extract normalized URLs from text.
pub fn extract_urls(text: &str) -> BTreeSet<String> {
    url_re()
        .find_iter(text)
        .filter_map(|m| normalize_url(m.as_str()))
        .collect()
}

/// Normalize one URL: trim trailing punctuation, lowercase scheme and host,
/// drop the fragment. Returns None when nothing is left of the host.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim_end_matches(TRAILING_PUNCTUATION);
    let (scheme, rest) = url.split_once("://")?;

    let rest = rest.split('#').next().unwrap_or("");
    let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (host, tail) = rest.split_at(host_end);
    if host.is_empty() {
        return None;
    }

    Some(format!(
        "{}://{}{}",
        scheme.to_ascii_lowercase(),
        host.to_ascii_lowercase(),
        tail
    ))
}

/// Extract lowercase hashtags (without the `#`).
///
/// URLs are removed first so that `page#section` fragments don't read as tags.
pub fn extract_hashtags(text: &str) -> BTreeSet<String> {
    let without_urls = url_re().replace_all(text, " ");
    hashtag_re()
        .captures_iter(&without_urls)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Reduce post content to the words a reader would compare.
///
/// Lowercases, strips URLs, hashtags and @mentions, and collapses whitespace.
pub fn normalize_text(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = url_re().replace_all(&lower, " ");
    let stripped = hashtag_re().replace_all(&stripped, " ");
    let stripped = mention_re().replace_all(&stripped, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_urls_normalizes() {
        let urls = extract_urls(
            "See HTTPS://Example.COM/Path?q=1. Also (https://example.com/Path?q=1) and https://a.org/x#frag",
        );
        assert_eq!(urls.len(), 2, "got {urls:?}");
        assert!(urls.contains("https://example.com/Path?q=1"));
        assert!(urls.contains("https://a.org/x"));
    }

    #[test]
    fn test_extract_urls_empty_text() {
        assert!(extract_urls("").is_empty());
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn test_normalize_url_without_host() {
        assert_eq!(normalize_url("https:///path"), None);
    }

    #[test]
    fn test_extract_hashtags_lowercases_and_skips_fragments() {
        let tags = extract_hashtags("#Election day! #VOTE #vote https://x.com/page#anchor");
        let expected: BTreeSet<String> = ["election", "vote"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_normalize_text_strips_noise() {
        let text = normalize_text("  BREAKING: @alice.bsky.social says #wow https://t.co/abc   it's TRUE ");
        assert_eq!(text, "breaking: says it's true");
    }
}
