// Colored terminal output for metrics, clusters, spikes and run summaries.
//
// main.rs fetches the data and hands it here; nothing in this module touches
// the store.

use colored::Colorize;

use crate::db::models::{CoordinationCluster, CoordinationLevel, CoordinationMetric};
use crate::pipeline::RunSummary;
use crate::platforms::Platform;
use crate::scoring::SpikeRecord;

const BUCKET_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Display the stored metric series for one platform.
pub fn display_metrics(platform: Platform, metrics: &[CoordinationMetric]) {
    if metrics.is_empty() {
        println!("No metrics stored for {platform} in this range. Run `murmur analyze` first.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Coordination: {platform} ({} buckets) ===", metrics.len()).bold()
    );
    println!();

    println!(
        "  {:<16}  {:>6}  {:<9}  {:>8}  {:>6}  {:>6}  {:>6}",
        "Bucket".dimmed(),
        "Score".dimmed(),
        "Level".dimmed(),
        "Clusters".dimmed(),
        "Coord".dimmed(),
        "Posts".dimmed(),
        "Sync".dimmed(),
    );
    println!("  {}", "-".repeat(72).dimmed());

    for metric in metrics {
        let level = metric.level();
        println!(
            "  {:<16}  {:>6.1}  {:<9}  {:>8}  {:>6}  {:>6}  {:>6.3}",
            metric.bucket_start.format(BUCKET_FORMAT),
            metric.score,
            colorize_level(level),
            metric.cluster_count,
            metric.coordinated_post_count,
            metric.total_post_count,
            metric.sync_rate,
        );
    }
    println!();

    let total_posts: usize = metrics.iter().map(|m| m.total_post_count).sum();
    let avg = metrics.iter().map(|m| m.score).sum::<f64>() / metrics.len() as f64;
    println!("  Average score {avg:.1} over {total_posts} posts");

    let high = metrics
        .iter()
        .filter(|m| m.level() == CoordinationLevel::High)
        .count();
    if high > 0 {
        println!("  {} {} high-coordination buckets", "!!".red().bold(), high);
    }
}

/// Display the clusters of one bucket with their members.
pub fn display_clusters(clusters: &[CoordinationCluster]) {
    if clusters.is_empty() {
        println!("No coordination clusters in this bucket.");
        return;
    }

    println!(
        "\n{}",
        format!("=== {} coordination clusters ===", clusters.len()).bold()
    );

    for cluster in clusters {
        println!();
        println!("  {}", cluster.id.bold());
        let signal = cluster
            .primary_signal
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    {} accounts, {} edges, density {:.2}, {} posts, primary signal {}",
            cluster.size(),
            cluster.edge_count,
            cluster.density,
            cluster.post_count,
            signal.cyan(),
        );
        if let Some(topic) = &cluster.topic {
            println!("    Topic: {}", super::truncate_chars(topic, 60).dimmed());
        }
        for member in &cluster.members {
            println!(
                "      {:<40} centrality {:.2}  degree {:>2}  posts {:>3}",
                super::truncate_chars(&member.account_id, 40),
                member.centrality,
                member.degree,
                member.post_count,
            );
        }
    }
    println!();
}

/// Display detected spikes, highest z first.
pub fn display_spikes(platform: Platform, spikes: &[SpikeRecord], threshold: f64) {
    if spikes.is_empty() {
        println!("No spikes for {platform} at z >= {threshold:.1}.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Spikes: {platform} (z >= {threshold:.1}) ===").bold()
    );
    println!();
    println!(
        "  {:<16}  {:>6}  {:>6}  {:>8}  {:>7}  {:>6}  {:>8}",
        "Bucket".dimmed(),
        "Score".dimmed(),
        "z".dimmed(),
        "Baseline".dimmed(),
        "Std".dimmed(),
        "Posts".dimmed(),
        "Clusters".dimmed(),
    );
    println!("  {}", "-".repeat(72).dimmed());

    for spike in spikes {
        let z = format!("{:>6.2}", spike.z_score);
        let z = if spike.z_score >= threshold * 1.5 {
            z.red().bold()
        } else {
            z.bright_red()
        };
        println!(
            "  {:<16}  {:>6.1}  {}  {:>8.1}  {:>7.1}  {:>6}  {:>8}",
            spike.bucket_start.format(BUCKET_FORMAT),
            spike.score,
            z,
            spike.baseline_mean,
            spike.baseline_std,
            spike.total_posts,
            spike.cluster_count,
        );
    }
    println!();
}

/// Display the outcome of an `analyze` run.
pub fn display_run_summary(platform: Platform, summary: &RunSummary) {
    println!("\n{}", format!("=== Analysis: {platform} ===").bold());
    println!(
        "  Buckets: {} analyzed, {} failed, {} already stored (of {})",
        summary.analyzed.to_string().green(),
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().normal()
        },
        summary.skipped_existing,
        summary.requested,
    );
    println!(
        "  Posts: {}  Clusters: {}  Average score: {:.1}",
        summary.total_posts,
        summary.clusters_found,
        summary.avg_score(),
    );
    if let Some((bucket, score)) = summary.peak {
        println!(
            "  Peak: {:.1} ({}) at {}",
            score,
            colorize_level(CoordinationLevel::from_score(score)),
            bucket.format(BUCKET_FORMAT),
        );
    }
    if summary.degraded > 0 {
        println!(
            "  {} {} buckets degraded ({} malformed posts skipped)",
            "~".yellow(),
            summary.degraded,
            summary.malformed_posts,
        );
    }
    for failure in &summary.failures {
        println!(
            "  {} {}: {}",
            "!".red(),
            failure.bucket_start.format(BUCKET_FORMAT),
            super::truncate_chars(&failure.error, 100).dimmed(),
        );
    }
    if summary.cancelled {
        println!(
            "  {} Cancelled. Re-run with --resume to finish the range.",
            "!!".yellow().bold()
        );
    }
}

/// Colorize a coordination level.
fn colorize_level(level: CoordinationLevel) -> colored::ColoredString {
    let label = level.as_str();
    match level {
        CoordinationLevel::High => label.red().bold(),
        CoordinationLevel::Elevated => label.bright_red(),
        CoordinationLevel::Moderate => label.yellow(),
        CoordinationLevel::Low => label.green(),
    }
}
