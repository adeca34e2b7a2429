//! Ensemble anomaly scorer.
//!
//! Trains a seeded isolation forest over a feature matrix and derives a
//! decision threshold from the requested contamination rate. Scores are
//! one real number per row with lower meaning more anomalous; the
//! scorer is a pure function of its inputs plus the seed recorded in
//! the hyperparameters.

use anyhow::{Result, bail};
use feature_pipeline::FeatureMatrix;
use serde::{Deserialize, Serialize};

mod bundle;
mod forest;

pub use bundle::{ALGORITHM_NAME, ModelBundle};
pub use forest::IsolationForest;

/// Training hyperparameters. The seed makes training exactly
/// reproducible given the same dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Number of trees in the ensemble.
    pub trees: usize,
    /// Rows subsampled per tree.
    pub sample_size: usize,
    /// Random seed for tree construction.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            trees: 200,
            sample_size: 256,
            seed: 42,
        }
    }
}

/// Result of training: the forest, per-row training scores, and the
/// contamination-derived threshold.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub forest: IsolationForest,
    pub scores: Vec<f64>,
    pub threshold: f64,
}

/// Trains the scorer and computes its decision threshold.
///
/// # Errors
///
/// Returns an error if the matrix is degenerate or the contamination
/// rate is out of range.
pub fn train(matrix: &FeatureMatrix, contamination: f64, params: &TrainParams) -> Result<TrainOutput> {
    let forest = IsolationForest::fit(matrix, params)?;
    let scores = forest.decision_scores(matrix)?;
    let threshold = score_threshold(&scores, contamination)?;

    Ok(TrainOutput {
        forest,
        scores,
        threshold,
    })
}

/// Percentile cut over the training score distribution: the k-th
/// smallest score with `k = ceil(contamination * n)`, so approximately
/// `contamination` of training rows fall at or below the threshold.
/// Monotonic: increasing contamination never decreases the flagged
/// count. Not exact under ties.
///
/// # Errors
///
/// Returns an error if `scores` is empty or contamination is outside
/// (0, 0.5].
pub fn score_threshold(scores: &[f64], contamination: f64) -> Result<f64> {
    if scores.is_empty() {
        bail!("Cannot derive a threshold from an empty score set");
    }
    if !(contamination > 0.0 && contamination <= 0.5) {
        bail!("Contamination must be in (0, 0.5], got {contamination}");
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);

    let k = ((contamination * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    Ok(sorted[k - 1])
}

/// Anomaly verdict for one score under a fixed threshold.
#[must_use]
pub fn is_anomalous(score: f64, threshold: f64) -> bool {
    score <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_scores() -> Vec<f64> {
        // 100 distinct scores from -0.50 to 0.49.
        (0..100).map(|i| (i as f64 - 50.0) / 100.0).collect()
    }

    #[test]
    fn threshold_flags_approximately_the_contamination_fraction() {
        let scores = fixed_scores();
        let threshold = score_threshold(&scores, 0.05).expect("threshold should derive");

        let flagged = scores.iter().filter(|&&s| is_anomalous(s, threshold)).count();
        assert_eq!(flagged, 5);
    }

    #[test]
    fn threshold_is_monotonic_in_contamination() {
        let scores = fixed_scores();

        let mut previous = 0;
        for contamination in [0.01, 0.02, 0.05, 0.08, 0.10] {
            let threshold =
                score_threshold(&scores, contamination).expect("threshold should derive");
            let flagged = scores.iter().filter(|&&s| is_anomalous(s, threshold)).count();
            assert!(
                flagged >= previous,
                "flagged count decreased from {previous} to {flagged} at {contamination}"
            );
            previous = flagged;
        }
    }

    #[test]
    fn threshold_rejects_out_of_range_contamination() {
        let scores = fixed_scores();
        assert!(score_threshold(&scores, 0.0).is_err());
        assert!(score_threshold(&scores, 0.6).is_err());
        assert!(score_threshold(&[], 0.02).is_err());
    }

    #[test]
    fn training_flags_the_injected_outliers() {
        // 98 clustered rows plus 2 far outliers, contamination 0.02.
        let mut rows: Vec<Vec<f64>> = (0..98)
            .map(|i| vec![(i % 7) as f64 / 10.0])
            .collect();
        rows.push(vec![50.0]);
        rows.push(vec![60.0]);
        let matrix = FeatureMatrix {
            columns: vec!["x".to_string()],
            rows,
        };

        let output = train(&matrix, 0.02, &TrainParams::default()).expect("train should succeed");
        assert_eq!(output.scores.len(), 100);

        let flagged: Vec<usize> = output
            .scores
            .iter()
            .enumerate()
            .filter(|(_, &s)| is_anomalous(s, output.threshold))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![98, 99]);
    }
}
