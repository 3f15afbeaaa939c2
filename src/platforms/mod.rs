// Platforms: normalized post/account types and per-platform record normalizers.
//
// The engine never branches on platform identity: each platform only knows how
// to turn its own raw records into the shared Post/Account shape. Collection
// itself (talking to the Bluesky or Hacker News APIs) happens elsewhere.

pub mod bluesky;
pub mod hackernews;
pub mod import;
pub mod post;
pub mod traits;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

pub use import::{import_jsonl, ImportSummary};
pub use post::{Account, Engagement, Post, PostBatch};
pub use traits::{MemoryPosts, PostSource, StoredPosts};

/// A platform the engine has a normalizer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bluesky,
    HackerNews,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Bluesky => "bluesky",
            Platform::HackerNews => "hackernews",
        }
    }

    /// Normalize one raw platform record (as exported by a collector).
    pub fn normalize(&self, raw: &serde_json::Value) -> Result<NormalizedRecord> {
        match self {
            Platform::Bluesky => bluesky::normalize(raw),
            Platform::HackerNews => hackernews::normalize(raw),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoordinationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluesky" | "bsky" => Ok(Platform::Bluesky),
            "hackernews" | "hn" => Ok(Platform::HackerNews),
            other => Err(CoordinationError::UnknownPlatform(other.to_string())),
        }
    }
}

/// A post plus the account that wrote it, produced by a normalizer.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub post: Post,
    pub account: Account,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_aliases() {
        assert_eq!("bluesky".parse::<Platform>().unwrap(), Platform::Bluesky);
        assert_eq!("BSKY".parse::<Platform>().unwrap(), Platform::Bluesky);
        assert_eq!("hn".parse::<Platform>().unwrap(), Platform::HackerNews);
        assert_eq!(
            " hackernews ".parse::<Platform>().unwrap(),
            Platform::HackerNews
        );
    }

    #[test]
    fn test_platform_parse_unknown() {
        let err = "mastodon".parse::<Platform>().unwrap_err();
        assert!(matches!(err, CoordinationError::UnknownPlatform(ref p) if p == "mastodon"));
    }

    #[test]
    fn test_platform_display_roundtrip() {
        for platform in [Platform::Bluesky, Platform::HackerNews] {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
    }
}
