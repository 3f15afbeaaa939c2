// Bluesky normalizer: app.bsky.feed.defs#postView JSON to Post/Account.
//
// Collectors export post views exactly as the public AppView returns them.
// We only read the handful of fields the engine needs.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::post::{Account, Engagement, Post};
use super::{NormalizedRecord, Platform};
use crate::error::CoordinationError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: String,
    author: Author,
    record: Record,
    #[serde(default)]
    like_count: Option<i64>,
    #[serde(default)]
    repost_count: Option<i64>,
    #[serde(default)]
    reply_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Author {
    did: String,
    #[serde(default)]
    handle: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    #[serde(default)]
    text: String,
    created_at: String,
    #[serde(default)]
    reply: Option<ReplyRef>,
}

#[derive(Debug, Deserialize)]
struct ReplyRef {
    parent: StrongRef,
}

#[derive(Debug, Deserialize)]
struct StrongRef {
    uri: String,
}

/// Normalize one Bluesky post view.
pub fn normalize(raw: &serde_json::Value) -> Result<NormalizedRecord> {
    let view: PostView = serde_json::from_value(raw.clone()).map_err(|e| {
        CoordinationError::MalformedInput {
            post_id: raw
                .get("uri")
                .and_then(|u| u.as_str())
                .unwrap_or("<unknown>")
                .to_string(),
            reason: e.to_string(),
        }
    })?;

    if view.author.did.is_empty() {
        return Err(CoordinationError::MalformedInput {
            post_id: view.uri,
            reason: "missing author DID".to_string(),
        }
        .into());
    }

    let created_at = parse_timestamp(&view.record.created_at).ok_or_else(|| {
        CoordinationError::MalformedInput {
            post_id: view.uri.clone(),
            reason: format!("unparsable createdAt {:?}", view.record.created_at),
        }
    })?;

    let account = Account {
        id: view.author.did.clone(),
        platform: Platform::Bluesky,
        username: view
            .author
            .handle
            .clone()
            .unwrap_or_else(|| view.author.did.clone()),
    };

    let post = Post {
        id: view.uri,
        account_id: view.author.did,
        platform: Platform::Bluesky,
        content: view.record.text,
        created_at,
        engagement: Engagement {
            likes: view.like_count.unwrap_or(0),
            reposts: view.repost_count.unwrap_or(0),
            replies: view.reply_count.unwrap_or(0),
            score: 0,
        },
        parent_id: view.record.reply.map(|r| r.parent.uri),
    };

    Ok(NormalizedRecord { post, account })
}

/// Parse an AT Protocol datetime.
///
/// RFC 3339 covers the common case, including nanosecond fractions. Some
/// clients omit the offset entirely; those are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    #[test]
    fn test_normalize_reply_post() {
        let raw = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy",
            "author": {"did": "did:plc:abc", "handle": "abc.bsky.social"},
            "record": {
                "text": "Read this https://example.com/x #news",
                "createdAt": "2024-01-15T12:30:00.123456789Z",
                "reply": {
                    "root": {"uri": "at://did:plc:root/app.bsky.feed.post/0", "cid": "x"},
                    "parent": {"uri": "at://did:plc:root/app.bsky.feed.post/0", "cid": "x"}
                }
            },
            "likeCount": 4,
            "repostCount": 1
        });

        let record = normalize(&raw).unwrap();
        assert_eq!(record.post.account_id, "did:plc:abc");
        assert_eq!(record.account.username, "abc.bsky.social");
        assert_eq!(record.post.engagement.likes, 4);
        assert_eq!(record.post.engagement.replies, 0);
        assert_eq!(
            record.post.parent_id.as_deref(),
            Some("at://did:plc:root/app.bsky.feed.post/0")
        );
        assert_eq!(record.post.created_at.minute(), 30);
    }

    #[test]
    fn test_normalize_bad_timestamp_is_malformed() {
        let raw = json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/2",
            "author": {"did": "did:plc:abc"},
            "record": {"text": "hi", "createdAt": "yesterday-ish"}
        });
        let err = normalize(&raw).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoordinationError>(),
            Some(CoordinationError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_parse_timestamp_without_offset() {
        let dt = parse_timestamp("2024-01-15T12:30:00.5").unwrap();
        assert_eq!(
            dt.with_nanosecond(0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap()
        );
    }
}
