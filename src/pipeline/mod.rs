// Analysis pipeline: one bucket at a time (`analysis`), or a whole time range
// with bounded parallelism, resume and cancellation (`run`).

pub mod analysis;
pub mod buckets;
pub mod run;

pub use analysis::{analyze_bucket, BucketAnalysis, Degradation};
pub use buckets::{align_to_bucket, bucket_starts};
pub use run::{analyze_range, save_with_retry, BucketFailure, RangeRequest, RunSummary};
