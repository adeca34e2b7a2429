//! Seeded isolation forest.
//!
//! Anomalies are isolated by fewer random axis-aligned splits than
//! inliers, so short average path lengths mean anomalous. Scores use
//! the sklearn polarity: `0.5 - 2^(-E[h]/c(n))`, lower meaning more
//! anomalous. Tree construction is a pure function of the matrix and
//! the seed.

use anyhow::{Result, bail};
use feature_pipeline::FeatureMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::TrainParams;

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    fn path_length(&self, row: &[f64]) -> f64 {
        let mut index = self.root;
        let mut depth = 0.0;

        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    depth += 1.0;
                    index = if row[*feature] < *value { *left } else { *right };
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// A trained ensemble of isolation trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Tree>,
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Trains a forest over the matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is too small, has no columns, or
    /// the parameters are degenerate.
    pub fn fit(matrix: &FeatureMatrix, params: &TrainParams) -> Result<Self> {
        if params.trees == 0 {
            bail!("Ensemble size must be at least 1");
        }
        if params.sample_size < 2 {
            bail!("Sample size must be at least 2");
        }
        if matrix.n_cols() == 0 {
            bail!("Feature matrix has no columns");
        }
        if matrix.n_rows() < 2 {
            bail!("Training requires at least two rows");
        }

        let sample_size = params.sample_size.min(matrix.n_rows());
        // ceil(log2(sample_size)): beyond this depth the remaining
        // points are indistinguishable from inliers.
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.trees)
            .map(|_| {
                let indices = sample_indices(&mut rng, matrix.n_rows(), sample_size);
                build_tree(&matrix.rows, &indices, height_limit, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            sample_size,
            n_features: matrix.n_cols(),
        })
    }

    /// Scores every row of the matrix; lower means more anomalous.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix width disagrees with the training
    /// matrix.
    pub fn decision_scores(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        if matrix.n_cols() != self.n_features {
            bail!(
                "Feature matrix has {} columns, model expects {}",
                matrix.n_cols(),
                self.n_features
            );
        }

        let normalizer = average_path_length(self.sample_size);
        Ok(matrix
            .rows
            .iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|tree| tree.path_length(row)).sum();
                let expected = total / self.trees.len() as f64;
                0.5 - 2.0_f64.powf(-expected / normalizer)
            })
            .collect())
    }
}

/// Draws `k` distinct row indices via a partial Fisher-Yates shuffle.
fn sample_indices(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k.min(n) {
        let j = rng.random_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k.min(n));
    indices
}

fn build_tree(rows: &[Vec<f64>], indices: &[usize], height_limit: usize, rng: &mut StdRng) -> Tree {
    let mut nodes = Vec::new();
    let root = build_node(rows, indices, 0, height_limit, rng, &mut nodes);
    Tree { nodes, root }
}

fn build_node(
    rows: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
    nodes: &mut Vec<Node>,
) -> usize {
    if depth >= height_limit || indices.len() <= 1 {
        nodes.push(Node::Leaf {
            size: indices.len(),
        });
        return nodes.len() - 1;
    }

    // Only features that still vary within this node can split it.
    let n_features = rows[indices[0]].len();
    let candidates: Vec<usize> = (0..n_features)
        .filter(|&feature| {
            let first = rows[indices[0]][feature];
            indices.iter().any(|&i| rows[i][feature] != first)
        })
        .collect();

    if candidates.is_empty() {
        nodes.push(Node::Leaf {
            size: indices.len(),
        });
        return nodes.len() - 1;
    }

    let feature = candidates[rng.random_range(0..candidates.len())];
    let (min, max) = indices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &i| {
        let v = rows[i][feature];
        (lo.min(v), hi.max(v))
    });
    let value = min + rng.random::<f64>() * (max - min);

    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| rows[i][feature] < value);

    if left_indices.is_empty() || right_indices.is_empty() {
        nodes.push(Node::Leaf {
            size: indices.len(),
        });
        return nodes.len() - 1;
    }

    let left = build_node(rows, &left_indices, depth + 1, height_limit, rng, nodes);
    let right = build_node(rows, &right_indices, depth + 1, height_limit, rng, nodes);
    nodes.push(Node::Split {
        feature,
        value,
        left,
        right,
    });
    nodes.len() - 1
}

/// Average path length of an unsuccessful BST search over `n` points,
/// the standard isolation-forest normalization term.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
        }
    }
}
