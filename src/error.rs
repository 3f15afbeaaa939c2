// Error taxonomy for the coordination engine.
//
// Most of the crate returns anyhow::Result. These variants are the ones a
// caller has to tell apart: configuration problems abort a run before any
// bucket is touched, persistence conflicts are retried, malformed input is
// skipped. They travel inside anyhow::Error and are recovered with
// `downcast_ref::<CoordinationError>()`.
//
// Empty buckets and a disabled text-similarity signal are not errors at all;
// see `pipeline::analysis::Degradation`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown platform: {0} (expected one of: bluesky, hackernews)")]
    UnknownPlatform(String),

    #[error("Malformed post {post_id}: {reason}")]
    MalformedInput { post_id: String, reason: String },

    #[error("Persistence conflict on {platform} bucket {bucket_start}: {detail}")]
    PersistenceConflict {
        platform: String,
        bucket_start: DateTime<Utc>,
        detail: String,
    },
}

impl CoordinationError {
    /// Shorthand for a configuration error with a formatted message.
    pub fn config(msg: impl Into<String>) -> Self {
        CoordinationError::Configuration(msg.into())
    }

    /// True when the error is worth retrying with a fresh write.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::PersistenceConflict { .. })
    }
}

/// Check whether an anyhow error wraps a persistence conflict.
pub fn is_persistence_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CoordinationError>()
        .is_some_and(CoordinationError::is_transient)
}
