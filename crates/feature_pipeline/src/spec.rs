//! The frozen feature specification.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Training-time standardization parameters for one feature column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: f64,
    pub std: f64,
}

/// Everything needed to reproduce feature engineering identically
/// between training and inference.
///
/// Inference must use exactly the spec stored with the model that
/// produced the scores being recomputed, never one derived fresh from
/// the inference batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Ordered column names treated as continuous.
    pub numeric_features: Vec<String>,
    /// Ordered column names treated as discrete.
    pub categorical_features: Vec<String>,
    /// Per categorical feature: observed category value to integer
    /// code, fixed at training time.
    pub encoding_maps: BTreeMap<String, BTreeMap<String, u32>>,
    /// Per final feature column: training-time (mean, std).
    pub scaler_params: BTreeMap<String, ScalerParams>,
}

impl FeatureSpec {
    /// Final feature vector column order: numeric columns followed by
    /// encoded categorical columns.
    #[must_use]
    pub fn feature_columns(&self) -> Vec<String> {
        self.numeric_features
            .iter()
            .chain(self.categorical_features.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_columns_keep_numeric_before_categorical() {
        let spec = FeatureSpec {
            numeric_features: vec!["amount".to_string(), "count".to_string()],
            categorical_features: vec!["currency".to_string()],
            encoding_maps: BTreeMap::new(),
            scaler_params: BTreeMap::new(),
        };
        assert_eq!(spec.feature_columns(), ["amount", "count", "currency"]);
    }

    #[test]
    fn spec_round_trips_through_json() {
        let mut encoding_maps = BTreeMap::new();
        encoding_maps.insert(
            "currency".to_string(),
            BTreeMap::from([("cad".to_string(), 0), ("usd".to_string(), 1)]),
        );
        let mut scaler_params = BTreeMap::new();
        scaler_params.insert("amount".to_string(), ScalerParams { mean: 10.0, std: 2.0 });

        let spec = FeatureSpec {
            numeric_features: vec!["amount".to_string()],
            categorical_features: vec!["currency".to_string()],
            encoding_maps,
            scaler_params,
        };

        let json = serde_json::to_value(&spec).expect("spec should serialize");
        let back: FeatureSpec = serde_json::from_value(json).expect("spec should deserialize");
        assert_eq!(back, spec);
    }
}
