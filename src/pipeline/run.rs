// Range analysis: every bucket of a time range, a few at a time.
//
// Buckets are independent, so they are fetched, analyzed and saved in
// parallel (bounded by `concurrency`). Graph work is CPU-bound and runs on the
// blocking pool. Each bucket is saved as soon as it is done, which is what
// makes resume and Ctrl-C safe: whatever is stored is complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::analysis::{analyze_bucket, BucketAnalysis, Degradation};
use super::buckets::bucket_starts;
use crate::config::CoordinationConfig;
use crate::db::{CoordinationCluster, CoordinationMetric, Database};
use crate::error::{is_persistence_conflict, CoordinationError};
use crate::platforms::{Platform, PostSource};

/// Retries after the first failed save of a bucket.
const SAVE_RETRIES: u32 = 3;
const SAVE_BACKOFF_MS: u64 = 100;

/// What to analyze.
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub platform: Platform,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Skip buckets that already have a stored metric
    pub resume: bool,
}

#[derive(Debug, Clone)]
pub struct BucketFailure {
    pub bucket_start: DateTime<Utc>,
    pub error: String,
}

/// Aggregate outcome of one `analyze_range` call.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Buckets in the requested range
    pub requested: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub skipped_existing: usize,
    /// Stopped before every bucket was attempted
    pub cancelled: bool,
    pub total_posts: usize,
    pub clusters_found: usize,
    /// Buckets analyzed under at least one degradation
    pub degraded: usize,
    pub malformed_posts: usize,
    /// Highest-scoring bucket and its score
    pub peak: Option<(DateTime<Utc>, f64)>,
    pub failures: Vec<BucketFailure>,
    score_sum: f64,
}

impl RunSummary {
    /// Mean score over the buckets analyzed in this run.
    pub fn avg_score(&self) -> f64 {
        if self.analyzed == 0 {
            0.0
        } else {
            self.score_sum / self.analyzed as f64
        }
    }

    fn record(&mut self, analysis: &BucketAnalysis) {
        let metric = &analysis.metric;
        self.analyzed += 1;
        self.total_posts += metric.total_post_count;
        self.clusters_found += metric.cluster_count;
        self.score_sum += metric.score;
        if analysis.is_degraded() {
            self.degraded += 1;
        }
        for d in &analysis.degradations {
            if let Degradation::PostsSkipped(n) = d {
                self.malformed_posts += n;
            }
        }
        // Earliest bucket wins a tie so the peak doesn't depend on completion order
        let is_peak = match self.peak {
            None => true,
            Some((bucket, score)) => {
                metric.score > score || (metric.score == score && metric.bucket_start < bucket)
            }
        };
        if is_peak {
            self.peak = Some((metric.bucket_start, metric.score));
        }
    }

    fn record_failure(&mut self, bucket_start: DateTime<Utc>, err: &anyhow::Error) {
        self.failed += 1;
        self.failures.push(BucketFailure {
            bucket_start,
            error: format!("{err:#}"),
        });
    }
}

/// Save a bucket, retrying on persistence conflicts with exponential backoff.
///
/// Other errors are returned immediately.
pub async fn save_with_retry(
    store: &dyn Database,
    metric: &CoordinationMetric,
    clusters: &[CoordinationCluster],
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match store.save_bucket(metric, clusters).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < SAVE_RETRIES && is_persistence_conflict(&e) => {
                attempt += 1;
                let delay = StdDuration::from_millis(SAVE_BACKOFF_MS << (attempt - 1));
                warn!(
                    platform = %metric.platform,
                    bucket = %metric.bucket_start,
                    attempt,
                    error = %e,
                    "Save conflicted, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Analyze and store every bucket of `[request.start, request.end)`.
///
/// Configuration problems fail the whole call before any bucket is touched.
/// A failing bucket is logged and counted, and the rest of the range still
/// runs. Setting `stop` stops new buckets from starting; buckets already in
/// flight finish and are saved.
pub async fn analyze_range(
    source: &dyn PostSource,
    store: Arc<dyn Database>,
    request: &RangeRequest,
    config: &CoordinationConfig,
    stop: Arc<AtomicBool>,
) -> Result<RunSummary> {
    config.validate()?;
    if request.end <= request.start {
        return Err(CoordinationError::config(format!(
            "analysis range is empty: start {} is not before end {}",
            request.start, request.end
        ))
        .into());
    }

    let platform = request.platform;
    let width = config.bucket_width();
    let all = bucket_starts(request.start, request.end, width);
    let mut summary = RunSummary {
        requested: all.len(),
        ..RunSummary::default()
    };

    let pending = if request.resume {
        let (first, last) = match (all.first(), all.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Ok(summary),
        };
        let stored = store
            .stored_buckets(platform, first, last + width)
            .await
            .context("Failed to read stored buckets")?;
        all.into_iter()
            .filter(|b| !stored.contains(b))
            .collect::<Vec<_>>()
    } else {
        all
    };
    summary.skipped_existing = summary.requested - pending.len();

    info!(
        platform = %platform,
        start = %request.start,
        end = %request.end,
        buckets = pending.len(),
        skipped = summary.skipped_existing,
        concurrency = config.concurrency,
        "Starting analysis"
    );

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template("  Buckets [{bar:30}] {pos}/{len} ({eta})")?);

    let shared_config = Arc::new(config.clone());
    let results = stream::iter(pending)
        .take_while(|_| future::ready(!stop.load(Ordering::SeqCst)))
        .map(|bucket_start| {
            let store = Arc::clone(&store);
            let config = Arc::clone(&shared_config);
            async move {
                let outcome =
                    analyze_one(source, store.as_ref(), platform, bucket_start, width, config)
                        .await;
                (bucket_start, outcome)
            }
        })
        .buffer_unordered(config.concurrency.max(1));
    let mut results = std::pin::pin!(results);

    while let Some((bucket_start, outcome)) = results.next().await {
        match outcome {
            Ok(analysis) => summary.record(&analysis),
            Err(e) => {
                warn!(
                    platform = %platform,
                    bucket = %bucket_start,
                    error = %format!("{e:#}"),
                    "Bucket failed, continuing"
                );
                summary.record_failure(bucket_start, &e);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let attempted = summary.analyzed + summary.failed + summary.skipped_existing;
    summary.cancelled = attempted < summary.requested;
    if summary.cancelled {
        warn!(
            platform = %platform,
            remaining = summary.requested - attempted,
            "Analysis cancelled, stored buckets remain valid"
        );
    }

    info!(
        platform = %platform,
        analyzed = summary.analyzed,
        failed = summary.failed,
        posts = summary.total_posts,
        clusters = summary.clusters_found,
        "Analysis finished"
    );

    Ok(summary)
}

async fn analyze_one(
    source: &dyn PostSource,
    store: &dyn Database,
    platform: Platform,
    bucket_start: DateTime<Utc>,
    width: Duration,
    config: Arc<CoordinationConfig>,
) -> Result<BucketAnalysis> {
    let bucket_end = bucket_start + width;
    let batch = source
        .get_posts(platform, bucket_start, bucket_end)
        .await
        .with_context(|| format!("Failed to fetch posts for bucket {bucket_start}"))?;

    let analysis = tokio::task::spawn_blocking(move || {
        analyze_bucket(platform, bucket_start, bucket_end, batch, &config)
    })
    .await
    .context("Bucket analysis task failed")?;

    save_with_retry(store, &analysis.metric, &analysis.clusters)
        .await
        .with_context(|| format!("Failed to save bucket {bucket_start}"))?;

    Ok(analysis)
}
