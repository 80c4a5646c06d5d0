//! Isolation forest outlier model
//!
//! Each tree isolates rows with random axis-aligned splits. Rows that are
//! isolated after few splits get short average path lengths and therefore
//! high anomaly scores.

use super::DetectorError;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Default number of trees in the ensemble
pub const DEFAULT_TREES: usize = 100;

/// Default expected fraction of outliers
pub const DEFAULT_CONTAMINATION: f64 = 0.05;

/// Default RNG seed for reproducible fits
pub const DEFAULT_SEED: u64 = 42;

/// Upper bound for the per-tree sub-sample size
pub const MAX_SAMPLES: usize = 256;

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest hyper-parameters
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub contamination: f64,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: DEFAULT_TREES,
            contamination: DEFAULT_CONTAMINATION,
            max_samples: MAX_SAMPLES,
            seed: DEFAULT_SEED,
        }
    }
}

impl ForestConfig {
    fn validate(&self) -> Result<(), DetectorError> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(DetectorError::InvalidContamination(self.contamination));
        }
        if self.n_trees == 0 {
            return Err(DetectorError::InvalidTreeCount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    n_features: usize,
    contamination: f64,
}

impl IsolationForest {
    /// Fit a forest on the given rows
    ///
    /// Rows must share the same width, hold only finite values and number at
    /// least two.
    pub fn fit(config: &ForestConfig, rows: &[Vec<f64>]) -> Result<Self, DetectorError> {
        config.validate()?;

        if rows.len() < 2 {
            return Err(DetectorError::InsufficientRows(rows.len()));
        }

        let n_features = rows[0].len();
        if n_features == 0 {
            return Err(DetectorError::EmptyFeatures);
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_features {
                return Err(DetectorError::RaggedRow {
                    row: i,
                    expected: n_features,
                    found: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(DetectorError::NonFiniteFeature { row: i });
            }
        }

        let sample_size = rows.len().min(config.max_samples.max(2));
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.n_trees)
            .map(|_| {
                let mut indices = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                build_tree(rows, &mut indices, 0, height_limit, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            sample_size,
            n_features,
            contamination: config.contamination,
        })
    }

    /// Anomaly score in (0, 1] per row; higher is more anomalous
    pub fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let normalizer = average_path_length(self.sample_size);

        rows.iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|t| path_length(t, row, 0)).sum();
                let mean = total / self.trees.len() as f64;
                if normalizer > 0.0 {
                    2f64.powf(-mean / normalizer)
                } else {
                    1.0
                }
            })
            .collect()
    }

    /// Label each row; `true` marks an outlier
    ///
    /// A row is an outlier when its score lies strictly above the
    /// `1 - contamination` quantile of the scores of `rows`.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<bool> {
        let scores = self.score_samples(rows);
        let threshold = percentile(&scores, 100.0 * (1.0 - self.contamination));
        scores.iter().map(|s| *s > threshold).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn build_tree(
    rows: &[Vec<f64>],
    indices: &mut [usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary inside this node can split it
    let n_features = rows[indices[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|feature| {
            let (min, max) = indices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &i| {
                let v = rows[i][feature];
                (lo.min(v), hi.max(v))
            });
            (max > min).then_some((feature, min, max))
        })
        .collect();

    if candidates.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(min..max);

    // Partition in place: rows <= threshold first
    let mut split = 0;
    for i in 0..indices.len() {
        if rows[indices[i]][feature] <= threshold {
            indices.swap(i, split);
            split += 1;
        }
    }

    let (left, right) = indices.split_at_mut(split);
    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(rows, left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(rows, right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] <= *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
