//! Anomaly detection for latency statistics
//!
//! This module provides:
//! - An isolation forest outlier model
//! - A batch detector labelling each cycle's statistic records

mod detector;
mod isolation_forest;

pub use detector::{AnomalyDetector, MIN_BATCH_SIZE};
pub use isolation_forest::{
    average_path_length, percentile, ForestConfig, IsolationForest, DEFAULT_CONTAMINATION,
    DEFAULT_SEED, DEFAULT_TREES, MAX_SAMPLES,
};

use thiserror::Error;

/// Reasons the outlier model cannot be fitted
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("need at least 2 rows to fit, got {0}")]
    InsufficientRows(usize),

    #[error("feature rows are empty")]
    EmptyFeatures,

    #[error("row {row} has {found} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row} contains a non-finite feature")]
    NonFiniteFeature { row: usize },

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("forest needs at least one tree")]
    InvalidTreeCount,
}
