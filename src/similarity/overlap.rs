// Shared URLs and hashtags between two posts.

use std::collections::BTreeSet;

use crate::platforms::Post;

/// Normalized URLs both posts link to.
pub fn url_overlap(a: &Post, b: &Post) -> BTreeSet<String> {
    let (ua, ub) = (a.urls(), b.urls());
    ua.intersection(&ub).cloned().collect()
}

/// Lowercase hashtags both posts carry.
pub fn hashtag_overlap(a: &Post, b: &Post) -> BTreeSet<String> {
    let (ha, hb) = (a.hashtags(), b.hashtags());
    ha.intersection(&hb).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{Engagement, Platform};
    use chrono::Utc;

    fn post(content: &str) -> Post {
        Post {
            id: "p".to_string(),
            account_id: "a".to_string(),
            platform: Platform::Bluesky,
            content: content.to_string(),
            created_at: Utc::now(),
            engagement: Engagement::default(),
            parent_id: None,
        }
    }

    #[test]
    fn test_url_overlap_uses_normalized_form() {
        let a = post("look https://News.example.com/story?id=7.");
        let b = post("(https://news.example.com/story?id=7) wow");
        let c = post("https://news.example.com/story?id=8");
        assert_eq!(url_overlap(&a, &b).len(), 1);
        assert!(url_overlap(&a, &c).is_empty());
    }

    #[test]
    fn test_hashtag_overlap_case_insensitive() {
        let a = post("#Vote #Rigged #news");
        let b = post("#vote #rigged #sports");
        let shared = hashtag_overlap(&a, &b);
        assert_eq!(shared.len(), 2);
        assert!(shared.contains("rigged"));
    }

    #[test]
    fn test_no_overlap_without_entities() {
        let a = post("plain text");
        let b = post("more plain text");
        assert!(url_overlap(&a, &b).is_empty());
        assert!(hashtag_overlap(&a, &b).is_empty());
    }
}
