// Hacker News normalizer: Firebase item JSON to Post/Account.
//
// Stories carry a title, an optional text body and an optional link; all
// three go into the content so the URL and text signals can see them.
// Comments carry `parent`, which becomes the reply target.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::post::{Account, Engagement, Post};
use super::{NormalizedRecord, Platform};
use crate::error::CoordinationError;

#[derive(Debug, Deserialize)]
struct Item {
    id: u64,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    parent: Option<u64>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    descendants: Option<i64>,
}

/// Normalize one Hacker News item.
pub fn normalize(raw: &serde_json::Value) -> Result<NormalizedRecord> {
    let item: Item =
        serde_json::from_value(raw.clone()).map_err(|e| CoordinationError::MalformedInput {
            post_id: raw
                .get("id")
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
            reason: e.to_string(),
        })?;

    let post_id = item.id.to_string();

    // Deleted items have no author, so nothing to attribute them to.
    let by = item
        .by
        .filter(|b| !b.is_empty())
        .ok_or_else(|| CoordinationError::MalformedInput {
            post_id: post_id.clone(),
            reason: "missing author".to_string(),
        })?;

    let created_at = item
        .time
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .ok_or_else(|| CoordinationError::MalformedInput {
            post_id: post_id.clone(),
            reason: format!("invalid unix time {:?}", item.time),
        })?;

    let content = [item.title, item.text, item.url]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let post = Post {
        id: post_id,
        account_id: by.clone(),
        platform: Platform::HackerNews,
        content,
        created_at,
        engagement: Engagement {
            score: item.score.unwrap_or(0),
            replies: item.descendants.unwrap_or(0),
            ..Engagement::default()
        },
        parent_id: item.parent.map(|p| p.to_string()),
    };

    // On HN the username is the account id.
    let account = Account {
        id: by.clone(),
        platform: Platform::HackerNews,
        username: by,
    };

    Ok(NormalizedRecord { post, account })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_story_includes_url_in_content() {
        let raw = json!({
            "id": 8863,
            "by": "dhouston",
            "time": 1175714200,
            "title": "My YC app: Dropbox",
            "url": "http://www.getdropbox.com/u/2/screencast.html",
            "score": 111,
            "descendants": 71,
            "type": "story"
        });
        let record = normalize(&raw).unwrap();
        assert_eq!(record.post.id, "8863");
        assert_eq!(record.post.account_id, "dhouston");
        assert!(record.post.content.contains("getdropbox.com"));
        assert_eq!(record.post.urls().len(), 1);
        assert_eq!(record.post.engagement.score, 111);
        assert!(record.post.parent_id.is_none());
    }

    #[test]
    fn test_normalize_comment_sets_parent() {
        let raw = json!({
            "id": 2921983,
            "by": "norvig",
            "parent": 2921506,
            "text": "Aw shucks, guys",
            "time": 1314211127,
            "type": "comment"
        });
        let record = normalize(&raw).unwrap();
        assert_eq!(record.post.parent_id.as_deref(), Some("2921506"));
    }

    #[test]
    fn test_deleted_item_is_malformed() {
        let raw = json!({"id": 1, "deleted": true, "time": 1314211127});
        let err = normalize(&raw).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoordinationError>(),
            Some(CoordinationError::MalformedInput { .. })
        ));
    }
}
