//! Batch anomaly detection over statistic records
//!
//! The model is refit from scratch on every batch; no history is carried
//! between cycles.

use super::{DetectorError, ForestConfig, IsolationForest};
use crate::models::{AnomalyRecord, StatRecord};
use tracing::{debug, warn};

/// Smallest batch the model is fitted on
pub const MIN_BATCH_SIZE: usize = 2;

/// Labels statistic records as normal or anomalous
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: ForestConfig,
}

impl AnomalyDetector {
    pub fn new(config: ForestConfig) -> Self {
        Self { config }
    }

    /// Feature row used for a record: `[avg_rtt, stddev_rtt, jitter]`
    pub fn features(record: &StatRecord) -> Vec<f64> {
        vec![record.avg_rtt, record.stddev_rtt, record.jitter]
    }

    /// Detect outliers in a batch, preserving batch order
    ///
    /// Batches below [`MIN_BATCH_SIZE`] and fit failures yield no anomalies.
    pub fn detect(&self, batch: &[StatRecord]) -> Vec<AnomalyRecord> {
        if batch.len() < MIN_BATCH_SIZE {
            debug!(batch_size = batch.len(), "Batch too small for anomaly detection");
            return Vec::new();
        }

        match self.try_detect(batch) {
            Ok(anomalies) => anomalies,
            Err(e) => {
                warn!(error = %e, batch_size = batch.len(), "Anomaly model fit failed");
                Vec::new()
            }
        }
    }

    /// Fit and label, surfacing model errors
    pub fn try_detect(&self, batch: &[StatRecord]) -> Result<Vec<AnomalyRecord>, DetectorError> {
        let rows: Vec<Vec<f64>> = batch.iter().map(Self::features).collect();
        let forest = IsolationForest::fit(&self.config, &rows)?;
        let labels = forest.predict(&rows);

        Ok(batch
            .iter()
            .zip(labels)
            .filter(|(_, outlier)| *outlier)
            .map(|(record, _)| AnomalyRecord::from(record))
            .collect())
    }
}
