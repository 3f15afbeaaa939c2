use std::env;
use std::str::FromStr;

use anyhow::Result;

use crate::error::CoordinationError;

/// One day. Windows longer than a bucket find nothing new anyway.
const MAX_SYNC_WINDOW_SECONDS: i64 = 86_400;
/// One week.
const MAX_BUCKET_MINUTES: i64 = 10_080;
/// Ten years.
const MAX_LOOKBACK_HOURS: i64 = 87_600;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
pub struct Config {
    /// SQLite database path (MURMUR_DB_PATH, default ./murmur.db)
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    /// Thresholds, weights and windows for the coordination engine
    pub coordination: CoordinationConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every coordination setting has a default. A value that is present but
    /// unparsable, or parses to something out of range, is a configuration
    /// error and the run never starts.
    pub fn load() -> Result<Self> {
        let coordination = CoordinationConfig::from_env()?;
        coordination.validate()?;

        Ok(Self {
            db_path: env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "./murmur.db".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            coordination,
        })
    }

    /// True when DATABASE_URL points at PostgreSQL.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|u| u.starts_with("postgres://") || u.starts_with("postgresql://"))
    }
}

/// Weight each coordination signal contributes to an edge.
#[derive(Debug, Clone)]
pub struct SignalWeights {
    pub sync: f64,
    pub url: f64,
    pub text: f64,
    pub hashtag: f64,
    pub reply_pattern: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            sync: 1.0,
            url: 1.5,
            text: 1.0,
            hashtag: 0.5,
            reply_pattern: 0.8,
        }
    }
}

/// Weights of the three terms of the coordination score.
///
/// `score = 100 * (coverage * coverage_w + density * density_w + sync_rate * sync_w)`
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub coverage: f64,
    pub density: f64,
    pub sync_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            coverage: 0.4,
            density: 0.3,
            sync_rate: 0.3,
        }
    }
}

/// Everything that changes what the engine computes for a bucket.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Posts from two accounts this close together are "synchronized"
    pub sync_window_seconds: i64,
    /// Cosine similarity a post pair must exceed to count as near-duplicate text
    pub text_similarity_threshold: f64,
    /// Shared hashtags a post pair needs for the hashtag signal
    pub min_hashtag_overlap: usize,
    pub min_cluster_size: usize,
    pub min_cluster_density: f64,
    /// Louvain resolution (1.0 = standard modularity)
    pub louvain_resolution: f64,
    pub spike_z_threshold: f64,
    pub spike_lookback_hours: i64,
    /// Fewer stored buckets than this in the lookback window means no spikes
    pub spike_min_samples: usize,
    pub bucket_minutes: i64,
    /// Above this many posts a bucket is analyzed on a deterministic sample
    pub max_posts_per_bucket: usize,
    /// Buckets analyzed in parallel
    pub concurrency: usize,
    pub signal_weights: SignalWeights,
    pub score_weights: ScoreWeights,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            sync_window_seconds: 90,
            text_similarity_threshold: 0.8,
            min_hashtag_overlap: 2,
            min_cluster_size: 3,
            min_cluster_density: 0.3,
            louvain_resolution: 1.0,
            spike_z_threshold: 2.0,
            spike_lookback_hours: 168,
            spike_min_samples: 10,
            bucket_minutes: 60,
            max_posts_per_bucket: 5000,
            concurrency: default_concurrency(),
            signal_weights: SignalWeights::default(),
            score_weights: ScoreWeights::default(),
        }
    }
}

impl CoordinationConfig {
    /// Build from MURMUR_* environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            sync_window_seconds: env_or("MURMUR_SYNC_WINDOW_SECONDS", d.sync_window_seconds)?,
            text_similarity_threshold: env_or(
                "MURMUR_TEXT_SIMILARITY_THRESHOLD",
                d.text_similarity_threshold,
            )?,
            min_hashtag_overlap: env_or("MURMUR_MIN_HASHTAG_OVERLAP", d.min_hashtag_overlap)?,
            min_cluster_size: env_or("MURMUR_MIN_CLUSTER_SIZE", d.min_cluster_size)?,
            min_cluster_density: env_or("MURMUR_MIN_CLUSTER_DENSITY", d.min_cluster_density)?,
            louvain_resolution: env_or("MURMUR_LOUVAIN_RESOLUTION", d.louvain_resolution)?,
            spike_z_threshold: env_or("MURMUR_SPIKE_Z_THRESHOLD", d.spike_z_threshold)?,
            spike_lookback_hours: env_or("MURMUR_SPIKE_LOOKBACK_HOURS", d.spike_lookback_hours)?,
            spike_min_samples: env_or("MURMUR_SPIKE_MIN_SAMPLES", d.spike_min_samples)?,
            bucket_minutes: env_or("MURMUR_BUCKET_MINUTES", d.bucket_minutes)?,
            max_posts_per_bucket: env_or("MURMUR_MAX_POSTS_PER_BUCKET", d.max_posts_per_bucket)?,
            concurrency: env_or("MURMUR_CONCURRENCY", d.concurrency)?,
            signal_weights: d.signal_weights,
            score_weights: d.score_weights,
        })
    }

    /// Reject values that would make the analysis meaningless.
    ///
    /// Runs before any bucket is processed so a bad setting never produces
    /// partial writes.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(CoordinationError::config(msg).into()) };

        if !(1..=MAX_SYNC_WINDOW_SECONDS).contains(&self.sync_window_seconds) {
            return fail(format!(
                "sync_window_seconds must be in 1..={MAX_SYNC_WINDOW_SECONDS}, got {}",
                self.sync_window_seconds
            ));
        }
        if !(self.text_similarity_threshold > 0.0 && self.text_similarity_threshold <= 1.0) {
            return fail(format!(
                "text_similarity_threshold must be in (0, 1], got {}",
                self.text_similarity_threshold
            ));
        }
        if self.min_hashtag_overlap == 0 {
            return fail("min_hashtag_overlap must be at least 1".to_string());
        }
        if self.min_cluster_size < 2 {
            return fail(format!(
                "min_cluster_size must be at least 2, got {}",
                self.min_cluster_size
            ));
        }
        if !(0.0..=1.0).contains(&self.min_cluster_density) {
            return fail(format!(
                "min_cluster_density must be in [0, 1], got {}",
                self.min_cluster_density
            ));
        }
        if !(self.louvain_resolution.is_finite() && self.louvain_resolution > 0.0) {
            return fail(format!(
                "louvain_resolution must be positive, got {}",
                self.louvain_resolution
            ));
        }
        if !(self.spike_z_threshold.is_finite() && self.spike_z_threshold > 0.0) {
            return fail(format!(
                "spike_z_threshold must be positive, got {}",
                self.spike_z_threshold
            ));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.spike_lookback_hours) {
            return fail(format!(
                "spike_lookback_hours must be in 1..={MAX_LOOKBACK_HOURS}, got {}",
                self.spike_lookback_hours
            ));
        }
        if !(1..=MAX_BUCKET_MINUTES).contains(&self.bucket_minutes) {
            return fail(format!(
                "bucket_minutes must be in 1..={MAX_BUCKET_MINUTES}, got {}",
                self.bucket_minutes
            ));
        }
        if self.max_posts_per_bucket < 2 {
            return fail(format!(
                "max_posts_per_bucket must be at least 2, got {}",
                self.max_posts_per_bucket
            ));
        }
        if self.concurrency == 0 {
            return fail("concurrency must be at least 1".to_string());
        }

        let w = &self.signal_weights;
        for (name, value) in [
            ("sync", w.sync),
            ("url", w.url),
            ("text", w.text),
            ("hashtag", w.hashtag),
            ("reply_pattern", w.reply_pattern),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return fail(format!("{name} edge weight must be non-negative, got {value}"));
            }
        }
        let s = &self.score_weights;
        for (name, value) in [
            ("coverage", s.coverage),
            ("density", s.density),
            ("sync_rate", s.sync_rate),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return fail(format!("{name} score weight must be non-negative, got {value}"));
            }
        }

        Ok(())
    }

    /// Width of one analysis bucket. Saturates for widths `validate` rejects.
    pub fn bucket_width(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.bucket_minutes).unwrap_or(chrono::Duration::MAX)
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Read and parse an env var, using `default` when it's unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            CoordinationError::config(format!("{key}={raw:?} is not valid: {e}")).into()
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_config_error(config: &CoordinationConfig) {
        let err = config.validate().unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<CoordinationError>(),
                Some(CoordinationError::Configuration(_))
            ),
            "expected a configuration error, got {err}"
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync_window_seconds, 90);
        assert!((config.text_similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.min_cluster_size, 3);
        assert!((config.min_cluster_density - 0.3).abs() < f64::EPSILON);
        assert!((config.spike_z_threshold - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.spike_lookback_hours, 168);
    }

    #[test]
    fn test_negative_window_rejected() {
        let config = CoordinationConfig {
            sync_window_seconds: -5,
            ..Default::default()
        };
        assert_config_error(&config);
    }

    #[test]
    fn test_density_above_one_rejected() {
        let config = CoordinationConfig {
            min_cluster_density: 1.2,
            ..Default::default()
        };
        assert_config_error(&config);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = CoordinationConfig {
            text_similarity_threshold: 0.0,
            ..Default::default()
        };
        assert_config_error(&config);
    }

    #[test]
    fn test_nan_z_threshold_rejected() {
        let config = CoordinationConfig {
            spike_z_threshold: f64::NAN,
            ..Default::default()
        };
        assert_config_error(&config);
    }

    #[test]
    fn test_negative_edge_weight_rejected() {
        let mut config = CoordinationConfig::default();
        config.signal_weights.url = -1.5;
        assert_config_error(&config);
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for config in [
            CoordinationConfig {
                bucket_minutes: i64::MAX,
                ..Default::default()
            },
            CoordinationConfig {
                spike_lookback_hours: i64::MAX / 2,
                ..Default::default()
            },
            CoordinationConfig {
                sync_window_seconds: i64::MAX,
                ..Default::default()
            },
        ] {
            assert_config_error(&config);
            // Still callable without panicking
            let _ = config.bucket_width();
        }
    }

    #[test]
    fn test_bucket_width() {
        let config = CoordinationConfig::default();
        assert_eq!(config.bucket_width(), chrono::Duration::hours(1));
    }
}
