//! Deterministic transformation from a raw tabular dataset into a
//! numeric feature matrix.
//!
//! `fit` freezes the encoding and scaling decisions into a
//! [`FeatureSpec`]; `apply` replays a frozen spec against new data.
//! Nothing here depends on statistics of the inference batch.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::dataset::Dataset;
use crate::spec::{FeatureSpec, ScalerParams};

/// Standard deviations below this are treated as constant columns,
/// which are centered but not divided.
const STD_FLOOR: f64 = 1e-12;

/// Dense numeric matrix with rows aligned 1:1 to the input dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Final feature column order: numeric then categorical.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }
}

/// Fits the pipeline on a training dataset: assigns category codes,
/// computes scaler parameters, and returns the scaled matrix together
/// with the frozen spec.
///
/// # Errors
///
/// Returns an error if the dataset is empty or missing a named column.
pub fn fit(
    dataset: &Dataset,
    numeric_features: &[String],
    categorical_features: &[String],
) -> Result<(FeatureMatrix, FeatureSpec)> {
    dataset.require_columns(numeric_features)?;
    dataset.require_columns(categorical_features)?;
    if dataset.is_empty() {
        bail!("Training dataset has no rows");
    }

    // Category codes: lexicographic over distinct training values.
    let mut encoding_maps = BTreeMap::new();
    for column in categorical_features {
        let distinct: BTreeSet<String> = (0..dataset.n_rows())
            .map(|row| dataset.value(row, column).unwrap_or("").to_string())
            .collect();

        let mapping: BTreeMap<String, u32> = distinct
            .into_iter()
            .enumerate()
            .map(|(code, value)| (value, code as u32))
            .collect();
        encoding_maps.insert(column.clone(), mapping);
    }

    let raw = encode_rows(dataset, numeric_features, categorical_features, &encoding_maps);

    // Scaler parameters from the training columns only.
    let columns: Vec<String> = numeric_features
        .iter()
        .chain(categorical_features.iter())
        .cloned()
        .collect();
    let mut scaler_params = BTreeMap::new();
    for (col, name) in columns.iter().enumerate() {
        let values: Vec<f64> = raw.iter().map(|row| row[col]).collect();
        scaler_params.insert(name.clone(), column_scaler(&values));
    }

    let spec = FeatureSpec {
        numeric_features: numeric_features.to_vec(),
        categorical_features: categorical_features.to_vec(),
        encoding_maps,
        scaler_params,
    };

    let rows = scale_rows(raw, &columns, &spec);

    Ok((FeatureMatrix { columns, rows }, spec))
}

/// Replays a frozen spec against a dataset, producing a matrix with the
/// spec's column order and training-time scaling.
///
/// Category values never seen at training time encode to 0.
///
/// # Errors
///
/// Returns an error if the dataset is missing a column the spec names.
pub fn apply(dataset: &Dataset, spec: &FeatureSpec) -> Result<FeatureMatrix> {
    dataset.require_columns(&spec.numeric_features)?;
    dataset.require_columns(&spec.categorical_features)?;

    let raw = encode_rows(
        dataset,
        &spec.numeric_features,
        &spec.categorical_features,
        &spec.encoding_maps,
    );

    let columns = spec.feature_columns();
    let rows = scale_rows(raw, &columns, spec);

    Ok(FeatureMatrix { columns, rows })
}

/// Builds the unscaled matrix: parsed numeric columns followed by
/// encoded categorical columns.
fn encode_rows(
    dataset: &Dataset,
    numeric_features: &[String],
    categorical_features: &[String],
    encoding_maps: &BTreeMap<String, BTreeMap<String, u32>>,
) -> Vec<Vec<f64>> {
    (0..dataset.n_rows())
        .map(|row| {
            let mut values = Vec::with_capacity(numeric_features.len() + categorical_features.len());

            for column in numeric_features {
                values.push(parse_numeric(dataset.value(row, column)));
            }
            for column in categorical_features {
                let cell = dataset.value(row, column).unwrap_or("");
                let code = encoding_maps
                    .get(column)
                    .and_then(|mapping| mapping.get(cell))
                    .copied()
                    .unwrap_or(0);
                values.push(f64::from(code));
            }

            values
        })
        .collect()
}

/// Missing or unparsable numeric values become 0 before scaling. This
/// is a fixed policy, not imputation: repeatability at inference time
/// must not depend on statistics of the inference batch.
fn parse_numeric(cell: Option<&str>) -> f64 {
    cell.and_then(|v| v.trim().parse::<f64>().ok()).unwrap_or(0.0)
}

/// Population mean and standard deviation of one column.
fn column_scaler(values: &[f64]) -> ScalerParams {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    ScalerParams {
        mean,
        std: variance.sqrt(),
    }
}

/// Standardizes every column with the spec's training-time parameters.
/// Columns without scaler parameters pass through unchanged.
fn scale_rows(raw: Vec<Vec<f64>>, columns: &[String], spec: &FeatureSpec) -> Vec<Vec<f64>> {
    raw.into_iter()
        .map(|row| {
            row.into_iter()
                .zip(columns)
                .map(|(value, name)| match spec.scaler_params.get(name) {
                    Some(params) if params.std > STD_FLOOR => (value - params.mean) / params.std,
                    Some(params) => value - params.mean,
                    None => value,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_spec() -> FeatureSpec {
        let mut encoding_maps = BTreeMap::new();
        encoding_maps.insert(
            "currency".to_string(),
            BTreeMap::from([("cad".to_string(), 0), ("usd".to_string(), 1)]),
        );
        let mut scaler_params = BTreeMap::new();
        scaler_params.insert("amount".to_string(), ScalerParams { mean: 10.0, std: 2.0 });

        FeatureSpec {
            numeric_features: vec!["amount".to_string()],
            categorical_features: vec!["currency".to_string()],
            encoding_maps,
            scaler_params,
        }
    }

    #[test]
    fn frozen_spec_replays_deterministically() {
        let dataset =
            Dataset::from_csv_bytes(b"amount,currency\n14.0,usd\n").expect("csv should parse");

        let matrix = apply(&dataset, &replay_spec()).expect("apply should succeed");
        assert_eq!(matrix.columns, ["amount", "currency"]);
        assert_eq!(matrix.rows, vec![vec![2.0, 1.0]]);
    }

    #[test]
    fn unseen_category_falls_back_to_code_zero() {
        // "eur" was never seen at training time; it shares code 0 with
        // the first training category.
        let dataset =
            Dataset::from_csv_bytes(b"amount,currency\n10.0,eur\n").expect("csv should parse");

        let matrix = apply(&dataset, &replay_spec()).expect("apply should succeed");
        assert_eq!(matrix.rows, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn missing_numeric_becomes_zero_before_scaling() {
        let dataset =
            Dataset::from_csv_bytes(b"amount,currency\n,cad\nnot-a-number,cad\n")
                .expect("csv should parse");

        let matrix = apply(&dataset, &replay_spec()).expect("apply should succeed");
        // (0 - 10) / 2 for both the empty and the unparsable cell.
        assert_eq!(matrix.rows[0][0], -5.0);
        assert_eq!(matrix.rows[1][0], -5.0);
    }

    #[test]
    fn fit_assigns_lexicographic_codes() {
        let dataset = Dataset::from_csv_bytes(
            b"amount,currency\n1.0,usd\n2.0,cad\n3.0,usd\n4.0,eur\n",
        )
        .expect("csv should parse");

        let (_, spec) = fit(
            &dataset,
            &["amount".to_string()],
            &["currency".to_string()],
        )
        .expect("fit should succeed");

        let mapping = &spec.encoding_maps["currency"];
        assert_eq!(mapping["cad"], 0);
        assert_eq!(mapping["eur"], 1);
        assert_eq!(mapping["usd"], 2);
    }

    #[test]
    fn fit_standardizes_training_columns() {
        let dataset = Dataset::from_csv_bytes(b"amount\n8.0\n12.0\n").expect("csv should parse");

        let (matrix, spec) = fit(&dataset, &["amount".to_string()], &[])
            .expect("fit should succeed");

        let params = &spec.scaler_params["amount"];
        assert_eq!(params.mean, 10.0);
        assert_eq!(params.std, 2.0);
        assert_eq!(matrix.rows, vec![vec![-1.0], vec![1.0]]);
    }

    #[test]
    fn constant_column_is_centered_without_dividing() {
        let dataset =
            Dataset::from_csv_bytes(b"amount\n5.0\n5.0\n5.0\n").expect("csv should parse");

        let (matrix, _) = fit(&dataset, &["amount".to_string()], &[])
            .expect("fit should succeed");

        assert!(matrix.rows.iter().all(|row| row[0] == 0.0));
    }

    #[test]
    fn fit_then_apply_round_trips_on_the_same_data() {
        let dataset = Dataset::from_csv_bytes(
            b"amount,currency\n1.0,usd\n5.0,cad\n9.0,usd\n",
        )
        .expect("csv should parse");

        let (fitted, spec) = fit(
            &dataset,
            &["amount".to_string()],
            &["currency".to_string()],
        )
        .expect("fit should succeed");
        let applied = apply(&dataset, &spec).expect("apply should succeed");

        assert_eq!(applied, fitted);
    }

    #[test]
    fn fit_rejects_missing_columns_and_empty_datasets() {
        let dataset = Dataset::from_csv_bytes(b"amount\n1.0\n").expect("csv should parse");
        assert!(fit(&dataset, &["volume".to_string()], &[]).is_err());

        let empty = Dataset::from_csv_bytes(b"amount\n").expect("csv should parse");
        assert!(fit(&empty, &["amount".to_string()], &[]).is_err());
    }
}
