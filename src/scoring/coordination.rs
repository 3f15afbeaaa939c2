// Coordination score formula.
//
// Three terms, each in [0, 1]:
//   coverage  = coordinated posts / all posts in the bucket
//   density   = mean density of the qualifying clusters
//   sync_rate = synchronized account pairs / possible account pairs
//
// score = clamp(100 * (0.4 * coverage + 0.3 * density + 0.3 * sync_rate), 0, 100)

use crate::config::ScoreWeights;

/// Counts the score is computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreInputs {
    pub coordinated_post_count: usize,
    pub total_post_count: usize,
    /// Densities of the qualifying clusters
    pub cluster_densities: Vec<f64>,
    pub synchronized_pairs: usize,
    pub account_count: usize,
}

/// The score and the three terms behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub coverage: f64,
    pub density: f64,
    pub sync_rate: f64,
    pub score: f64,
}

/// Fraction of all account pairs, 0 when there are fewer than two accounts.
pub fn pair_rate(pairs: usize, account_count: usize) -> f64 {
    if account_count < 2 {
        return 0.0;
    }
    let possible = (account_count * (account_count - 1) / 2) as f64;
    (pairs as f64 / possible).clamp(0.0, 1.0)
}

/// Compute the coordination score for one bucket.
pub fn compute_coordination_score(inputs: &ScoreInputs, weights: &ScoreWeights) -> ScoreBreakdown {
    let coverage = if inputs.total_post_count == 0 {
        0.0
    } else {
        (inputs.coordinated_post_count as f64 / inputs.total_post_count as f64).clamp(0.0, 1.0)
    };

    let density = if inputs.cluster_densities.is_empty() {
        0.0
    } else {
        inputs.cluster_densities.iter().sum::<f64>() / inputs.cluster_densities.len() as f64
    };

    let sync_rate = pair_rate(inputs.synchronized_pairs, inputs.account_count);

    let raw = 100.0
        * (weights.coverage * coverage + weights.density * density + weights.sync_rate * sync_rate);

    ScoreBreakdown {
        coverage,
        density,
        sync_rate,
        score: raw.clamp(0.0, 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bucket_scores_zero() {
        let breakdown = compute_coordination_score(&ScoreInputs::default(), &ScoreWeights::default());
        assert_eq!(breakdown, ScoreBreakdown::default());
    }

    #[test]
    fn test_formula() {
        let inputs = ScoreInputs {
            coordinated_post_count: 3,
            total_post_count: 13,
            cluster_densities: vec![1.0],
            synchronized_pairs: 3,
            account_count: 13,
        };
        let b = compute_coordination_score(&inputs, &ScoreWeights::default());
        // 100 * (0.4 * 3/13 + 0.3 * 1.0 + 0.3 * 3/78)
        let expected = 100.0 * (0.4 * 3.0 / 13.0 + 0.3 + 0.3 * 3.0 / 78.0);
        assert!((b.score - expected).abs() < 1e-9, "Expected {expected}, got {}", b.score);
        assert!((b.density - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_density_is_mean_of_clusters() {
        let inputs = ScoreInputs {
            coordinated_post_count: 6,
            total_post_count: 6,
            cluster_densities: vec![1.0, 0.5],
            synchronized_pairs: 0,
            account_count: 6,
        };
        let b = compute_coordination_score(&inputs, &ScoreWeights::default());
        assert!((b.density - 0.75).abs() < 1e-9);
        assert!((b.coverage - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped_with_oversized_weights() {
        let weights = ScoreWeights {
            coverage: 1.0,
            density: 1.0,
            sync_rate: 1.0,
        };
        let inputs = ScoreInputs {
            coordinated_post_count: 10,
            total_post_count: 10,
            cluster_densities: vec![1.0],
            synchronized_pairs: 1,
            account_count: 2,
        };
        let b = compute_coordination_score(&inputs, &weights);
        assert!((b.score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_account_has_no_sync_rate() {
        assert_eq!(pair_rate(5, 1), 0.0);
        assert_eq!(pair_rate(0, 0), 0.0);
        assert!((pair_rate(1, 2) - 1.0).abs() < f64::EPSILON);
    }
}
