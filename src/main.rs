use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use murmur::config::Config;
use murmur::db::Database;
use murmur::error::CoordinationError;
use murmur::output::terminal;
use murmur::pipeline::{align_to_bucket, RangeRequest};
use murmur::platforms::{Platform, StoredPosts};

/// Murmur: coordinated-behavior detection for social platforms.
///
/// Builds an account similarity graph per time bucket, finds dense clusters
/// of accounts acting together, and scores how coordinated each bucket is.
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Import raw platform records (one JSON object per line)
    Import {
        /// Platform the records come from (bluesky, hackernews)
        #[arg(long)]
        platform: Platform,

        /// JSONL file exported by a collector
        file: PathBuf,
    },

    /// Analyze a time range bucket by bucket and store the results
    Analyze {
        #[arg(long)]
        platform: Platform,

        /// Range start (RFC 3339 or "YYYY-MM-DD HH:MM", UTC)
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Range end, exclusive
        #[arg(long, requires = "start")]
        end: Option<String>,

        /// Analyze the last N completed hours instead of --start/--end (default: 24)
        #[arg(long, conflicts_with_all = ["start", "end"])]
        hours: Option<i64>,

        /// Buckets analyzed in parallel (default: MURMUR_CONCURRENCY or CPU count)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip buckets that already have stored metrics
        #[arg(long)]
        resume: bool,
    },

    /// Show stored coordination metrics
    Metrics {
        #[arg(long)]
        platform: Platform,

        /// How many hours back to show (default: 24)
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Show the clusters found in one bucket
    Clusters {
        #[arg(long)]
        platform: Platform,

        /// Any time inside the bucket (RFC 3339 or "YYYY-MM-DD HH:MM", UTC)
        #[arg(long)]
        bucket: String,
    },

    /// Find buckets whose score spikes above the recent baseline
    Spikes {
        #[arg(long)]
        platform: Platform,

        /// Baseline window in hours (default: MURMUR_SPIKE_LOOKBACK_HOURS or 168)
        #[arg(long)]
        lookback_hours: Option<i64>,

        /// z-score a bucket must reach (default: MURMUR_SPIKE_Z_THRESHOLD or 2.0)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Show store status (row counts, latest bucket)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("murmur=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing murmur database...");
            let config = Config::load()?;
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            if config.uses_postgres() {
                println!("Database initialized (PostgreSQL)");
            } else {
                println!("Database initialized at: {}", config.db_path);
            }
            println!("Tables: {table_count}");
            println!("\nNext: murmur import --platform bluesky posts.jsonl");
        }

        Commands::Import { platform, file } => {
            let config = Config::load()?;
            let db = init_database(&config).await?;
            let handle = std::fs::File::open(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let summary =
                murmur::platforms::import_jsonl(db.as_ref(), platform, std::io::BufReader::new(handle))
                    .await?;
            println!(
                "Imported {} posts from {} accounts ({} lines, {} malformed skipped)",
                summary.posts, summary.accounts, summary.lines, summary.malformed
            );
        }

        Commands::Analyze {
            platform,
            start,
            end,
            hours,
            concurrency,
            resume,
        } => {
            let mut config = Config::load()?;
            if let Some(c) = concurrency {
                config.coordination.concurrency = c;
            }
            let (start, end) = match (start, end) {
                (Some(s), Some(e)) => (parse_time(&s)?, parse_time(&e)?),
                _ => last_hours(hours.unwrap_or(24), &config)?,
            };

            let db = open_database(&config).await?;
            let source = StoredPosts::new(Arc::clone(&db));

            // Ctrl-C stops new buckets; in-flight buckets still save
            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nStopping after in-flight buckets finish...");
                    stop_signal.store(true, Ordering::SeqCst);
                }
            });

            let request = RangeRequest {
                platform,
                start,
                end,
                resume,
            };
            let summary = murmur::pipeline::analyze_range(
                &source,
                db,
                &request,
                &config.coordination,
                stop,
            )
            .await?;
            terminal::display_run_summary(platform, &summary);
        }

        Commands::Metrics { platform, hours } => {
            let config = Config::load()?;
            let (start, end) = last_hours(hours, &config)?;
            let db = open_database(&config).await?;
            // Include the bucket still in progress
            let metrics = db
                .get_metrics(platform, start, end + config.coordination.bucket_width())
                .await?;
            terminal::display_metrics(platform, &metrics);
        }

        Commands::Clusters { platform, bucket } => {
            let config = Config::load()?;
            let bucket_start =
                align_to_bucket(parse_time(&bucket)?, config.coordination.bucket_width());
            let db = open_database(&config).await?;
            match db.get_metric(platform, bucket_start).await? {
                Some(metric) => {
                    println!(
                        "Bucket {} scored {:.1} ({}) over {} posts",
                        bucket_start.format("%Y-%m-%d %H:%M"),
                        metric.score,
                        metric.level(),
                        metric.total_post_count
                    );
                    let clusters = db.get_clusters(platform, bucket_start).await?;
                    terminal::display_clusters(&clusters);
                }
                None => {
                    println!(
                        "Bucket {} has not been analyzed. Run `murmur analyze` first.",
                        bucket_start.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::Spikes {
            platform,
            lookback_hours,
            threshold,
        } => {
            let config = Config::load()?;
            let coordination = &config.coordination;
            let lookback = lookback_hours.unwrap_or(coordination.spike_lookback_hours);
            let threshold = threshold.unwrap_or(coordination.spike_z_threshold);
            if lookback <= 0 {
                return Err(CoordinationError::config("--lookback-hours must be positive").into());
            }
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(CoordinationError::config("--threshold must be a positive number").into());
            }

            let db = open_database(&config).await?;
            let spikes = murmur::scoring::detect_spikes(
                db.as_ref(),
                platform,
                Utc::now(),
                lookback,
                threshold,
                coordination.spike_min_samples,
            )
            .await?;
            terminal::display_spikes(platform, &spikes, threshold);
        }

        Commands::Status => {
            let config = Config::load()?;
            if config.uses_postgres() {
                let db = open_database(&config).await?;
                murmur::status::show(&db, "PostgreSQL (DATABASE_URL)", false).await?;
            } else if !std::path::Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `murmur init` to set up the database.");
            } else {
                let db = open_database(&config).await?;
                murmur::status::show(&db, &config.db_path, true).await?;
            }
        }
    }

    Ok(())
}

/// Parse a UTC time given as RFC 3339 or "YYYY-MM-DD HH:MM[:SS]".
fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(CoordinationError::config(format!(
        "invalid time {s:?} (expected RFC 3339 or \"YYYY-MM-DD HH:MM\")"
    ))
    .into())
}

/// The last `hours` hours of completed buckets.
fn last_hours(hours: i64, config: &Config) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if hours <= 0 {
        return Err(CoordinationError::config("--hours must be positive").into());
    }
    let end = align_to_bucket(Utc::now(), config.coordination.bucket_width());
    let start = Duration::try_hours(hours)
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| CoordinationError::config(format!("--hours {hours} is out of range")))?;
    Ok((start, end))
}

/// Select the database backend based on configuration.
///
/// When DATABASE_URL is set and points to PostgreSQL, uses the Postgres backend
/// (requires the `postgres` feature). Otherwise, falls back to SQLite.
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    if let Some(url) = config.database_url.as_deref().filter(|_| config.uses_postgres()) {
        return connect_postgres(url).await;
    }
    #[cfg(feature = "sqlite")]
    {
        murmur::db::open_sqlite(&config.db_path)
    }
    #[cfg(not(feature = "sqlite"))]
    anyhow::bail!("No database backend: set DATABASE_URL or rebuild with the 'sqlite' feature")
}

/// Initialize the database (create if needed).
async fn init_database(config: &Config) -> Result<Arc<dyn Database>> {
    if let Some(url) = config.database_url.as_deref().filter(|_| config.uses_postgres()) {
        return connect_postgres(url).await;
    }
    #[cfg(feature = "sqlite")]
    {
        murmur::db::initialize_sqlite(&config.db_path)
    }
    #[cfg(not(feature = "sqlite"))]
    anyhow::bail!("No database backend: set DATABASE_URL or rebuild with the 'sqlite' feature")
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str) -> Result<Arc<dyn Database>> {
    info!("Using PostgreSQL backend");
    murmur::db::connect_postgres(url).await
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str) -> Result<Arc<dyn Database>> {
    anyhow::bail!(
        "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
         Rebuild with: cargo build --features postgres"
    )
}
