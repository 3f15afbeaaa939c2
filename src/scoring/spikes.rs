// Spike detection over the stored coordination-score series.
//
// The baseline is the population mean and standard deviation of every stored
// bucket in the lookback window, the candidate bucket included. A bucket is a
// spike when the baseline varies at all and its z-score reaches the
// threshold. Too few stored buckets means no baseline and no spikes.
//
// A series of identical scores is flat even when summation leaves a few ulps
// of std behind: std at or below FLAT_TOLERANCE relative to the mean counts as
// zero.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::CoordinationMetric;
use crate::db::Database;
use crate::error::CoordinationError;
use crate::platforms::Platform;

/// Relative std below which a baseline is flat.
const FLAT_TOLERANCE: f64 = 1e-9;

/// A bucket whose score stands out from the window it sits in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeRecord {
    pub bucket_start: DateTime<Utc>,
    pub score: f64,
    pub z_score: f64,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    pub total_posts: usize,
    pub cluster_count: usize,
}

/// Population mean and standard deviation. None for an empty series.
pub fn baseline(scores: &[f64]) -> Option<(f64, f64)> {
    if scores.is_empty() {
        return None;
    }
    let first = scores[0];
    if scores.iter().all(|s| s.to_bits() == first.to_bits()) {
        return Some((first, 0.0));
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Whether a baseline has no meaningful spread.
pub fn is_flat(mean: f64, std: f64) -> bool {
    std.is_nan() || std <= FLAT_TOLERANCE * mean.abs().max(1.0)
}

/// Standard score of `score` against a baseline. 0 for a flat baseline.
pub fn z_score(score: f64, mean: f64, std: f64) -> f64 {
    if is_flat(mean, std) {
        0.0
    } else {
        (score - mean) / std
    }
}

/// Whether a z-score counts as a spike. A flat baseline never spikes.
pub fn is_spike(z: f64, std: f64, threshold: f64) -> bool {
    std > FLAT_TOLERANCE && z >= threshold
}

/// Find spikes in a window of stored metrics, sorted by z-score descending.
pub fn find_spikes(
    metrics: &[CoordinationMetric],
    threshold: f64,
    min_samples: usize,
) -> Vec<SpikeRecord> {
    if metrics.len() < min_samples {
        debug!(
            samples = metrics.len(),
            min_samples, "Not enough stored buckets for a baseline"
        );
        return Vec::new();
    }

    let scores: Vec<f64> = metrics.iter().map(|m| m.score).collect();
    let Some((mean, std)) = baseline(&scores) else {
        return Vec::new();
    };
    if is_flat(mean, std) {
        debug!(mean, std, "Flat baseline, no spikes");
        return Vec::new();
    }

    let mut spikes: Vec<SpikeRecord> = metrics
        .iter()
        .filter_map(|m| {
            let z = z_score(m.score, mean, std);
            is_spike(z, std, threshold).then(|| SpikeRecord {
                bucket_start: m.bucket_start,
                score: m.score,
                z_score: z,
                baseline_mean: mean,
                baseline_std: std,
                total_posts: m.total_post_count,
                cluster_count: m.cluster_count,
            })
        })
        .collect();

    spikes.sort_by(|a, b| {
        b.z_score
            .total_cmp(&a.z_score)
            .then_with(|| a.bucket_start.cmp(&b.bucket_start))
    });
    spikes
}

/// Load the lookback window from the store and find its spikes.
pub async fn detect_spikes(
    db: &dyn Database,
    platform: Platform,
    now: DateTime<Utc>,
    lookback_hours: i64,
    threshold: f64,
    min_samples: usize,
) -> Result<Vec<SpikeRecord>> {
    let start = Duration::try_hours(lookback_hours)
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .ok_or_else(|| {
            CoordinationError::config(format!("lookback of {lookback_hours} hours is out of range"))
        })?;
    let metrics = db
        .get_metrics(platform, start, now)
        .await
        .with_context(|| format!("Failed to load {platform} metrics for spike detection"))?;

    let spikes = find_spikes(&metrics, threshold, min_samples);
    info!(
        platform = %platform,
        buckets = metrics.len(),
        spikes = spikes.len(),
        threshold,
        "Spike detection complete"
    );
    Ok(spikes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(hour: i64, score: f64) -> CoordinationMetric {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
        CoordinationMetric {
            platform: Platform::Bluesky,
            bucket_start: start,
            bucket_end: start + Duration::hours(1),
            score,
            cluster_count: 0,
            coordinated_post_count: 0,
            total_post_count: 10,
            organic_post_count: 10,
            edge_count: 0,
            avg_cluster_size: 0.0,
            sync_rate: 0.0,
            url_sharing_rate: 0.0,
            text_similarity_rate: 0.0,
            computed_at: start,
        }
    }

    #[test]
    fn test_z_score_arithmetic() {
        let z = z_score(100.0, 23.0, 37.3);
        assert!((z - 2.064).abs() < 0.001, "Expected ~2.064, got {z}");
        assert!(is_spike(z, 37.3, 2.0));
        assert!(!is_spike(z, 37.3, 3.0));
    }

    #[test]
    fn test_population_baseline() {
        let (mean, std) = baseline(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std - 2.0).abs() < 1e-9);
        assert!(baseline(&[]).is_none());
    }

    #[test]
    fn test_single_outlier_flagged() {
        let mut metrics: Vec<CoordinationMetric> = (0..10).map(|h| metric(h, 10.0)).collect();
        metrics.push(metric(10, 100.0));
        let spikes = find_spikes(&metrics, 2.0, 10);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].bucket_start, metrics[10].bucket_start);
        assert!(spikes[0].z_score > 3.0);
    }

    #[test]
    fn test_flat_baseline_never_spikes() {
        let metrics: Vec<CoordinationMetric> = (0..20).map(|h| metric(h, 42.0)).collect();
        assert!(find_spikes(&metrics, 0.5, 10).is_empty());
    }

    #[test]
    fn test_repeated_inexact_score_is_flat() {
        // 55.15 has no exact binary form; summing it leaves ulps of std
        let metrics: Vec<CoordinationMetric> = (0..10).map(|h| metric(h, 55.15)).collect();
        let (mean, std) = baseline(&[55.15; 10]).unwrap();
        assert_eq!(std, 0.0);
        assert!(is_flat(mean, std));
        assert!(find_spikes(&metrics, 1.0, 10).is_empty());
        assert!(find_spikes(&metrics, 0.1, 10).is_empty());
    }

    #[test]
    fn test_float_noise_std_is_flat() {
        assert!(is_flat(55.15, 7.1e-15));
        assert_eq!(z_score(55.15, 55.149_999_999_999_99, 7.1e-15), 0.0);
        assert!(!is_flat(55.15, 0.01));
    }

    #[test]
    fn test_min_samples_guard() {
        let mut metrics: Vec<CoordinationMetric> = (0..5).map(|h| metric(h, 0.0)).collect();
        metrics.push(metric(5, 90.0));
        assert!(find_spikes(&metrics, 1.0, 10).is_empty());
        assert_eq!(find_spikes(&metrics, 1.0, 3).len(), 1);
    }

    #[test]
    fn test_sorted_by_z_descending() {
        let mut metrics: Vec<CoordinationMetric> = (0..20).map(|h| metric(h, 5.0)).collect();
        metrics.push(metric(20, 60.0));
        metrics.push(metric(21, 90.0));
        let spikes = find_spikes(&metrics, 1.5, 10);
        assert_eq!(spikes.len(), 2);
        assert!(spikes[0].z_score > spikes[1].z_score);
        assert!((spikes[0].score - 90.0).abs() < f64::EPSILON);
    }
}
