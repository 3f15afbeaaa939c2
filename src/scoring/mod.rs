// Scoring: the per-bucket coordination score and spike detection over the
// stored score series.

pub mod coordination;
pub mod spikes;

pub use coordination::{compute_coordination_score, pair_rate, ScoreBreakdown, ScoreInputs};
pub use spikes::{baseline, detect_spikes, find_spikes, is_flat, is_spike, z_score, SpikeRecord};
