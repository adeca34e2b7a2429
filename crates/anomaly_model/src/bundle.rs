//! The serialized model artifact.
//!
//! Everything inference needs travels as one indivisible unit: the
//! trained forest, the frozen feature spec (including fitted scaler
//! parameters), the training-derived threshold, and the
//! hyperparameters that produced it.

use anyhow::{Context, Result};
use feature_pipeline::FeatureSpec;
use serde::{Deserialize, Serialize};

use crate::{IsolationForest, TrainParams};

/// Algorithm name recorded in the model catalogue.
pub const ALGORITHM_NAME: &str = "isolation_forest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub algorithm: String,
    pub params: TrainParams,
    pub contamination: f64,
    pub threshold: f64,
    pub feature_spec: FeatureSpec,
    pub forest: IsolationForest,
}

impl ModelBundle {
    /// Serializes the bundle for the artifact store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize model bundle")
    }

    /// Restores a bundle from artifact-store bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid bundle.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to deserialize model bundle")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use feature_pipeline::FeatureMatrix;

    use super::*;

    #[test]
    fn bundle_round_trips_and_scores_identically() {
        let matrix = FeatureMatrix {
            columns: vec!["x".to_string()],
            rows: (0..64).map(|i| vec![(i % 8) as f64]).collect(),
        };
        let params = TrainParams {
            trees: 20,
            sample_size: 32,
            seed: 3,
        };
        let forest = IsolationForest::fit(&matrix, &params).expect("fit should succeed");
        let scores = forest.decision_scores(&matrix).expect("scoring should succeed");

        let bundle = ModelBundle {
            algorithm: ALGORITHM_NAME.to_string(),
            params,
            contamination: 0.02,
            threshold: -0.1,
            feature_spec: FeatureSpec {
                numeric_features: vec!["x".to_string()],
                categorical_features: vec![],
                encoding_maps: BTreeMap::new(),
                scaler_params: BTreeMap::new(),
            },
            forest,
        };

        let bytes = bundle.to_bytes().expect("bundle should serialize");
        let restored = ModelBundle::from_bytes(&bytes).expect("bundle should deserialize");

        assert_eq!(restored.algorithm, ALGORITHM_NAME);
        assert_eq!(restored.threshold, bundle.threshold);
        assert_eq!(restored.feature_spec, bundle.feature_spec);
        assert_eq!(
            restored.forest.decision_scores(&matrix).expect("scoring should succeed"),
            scores
        );
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(ModelBundle::from_bytes(b"not json").is_err());
    }
}
