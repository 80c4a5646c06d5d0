//! Latency statistics computation
//!
//! Reduces the raw output of the two probe rounds into a [`StatRecord`]:
//! loss/avg/max/min come from the summary round, jitter from the
//! single-packet round.

use crate::models::{ProbeSample, ProbeSummary, StatRecord};
use chrono::{DateTime, Utc};

/// Minimum number of values for a sample standard deviation
pub const MIN_STDDEV_SAMPLES: usize = 2;

/// Computes per-target statistic records
#[derive(Debug, Clone, Default)]
pub struct MetricComputer;

impl MetricComputer {
    pub fn new() -> Self {
        Self
    }

    /// Build the statistic record for one target
    ///
    /// `stddev_rtt` is the spread of the summary triple (avg, max, min) after
    /// dropping non-positive entries, not the spread of individual packets.
    pub fn compute(
        &self,
        target: &str,
        timestamp: DateTime<Utc>,
        summary: &ProbeSummary,
        jitter_samples: &[ProbeSample],
    ) -> StatRecord {
        let avg = summary.rtt_avg.unwrap_or(0.0);
        let max = summary.rtt_max.unwrap_or(0.0);
        let min = summary.rtt_min.unwrap_or(0.0);

        let triple: Vec<f64> = [avg, max, min]
            .into_iter()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();

        StatRecord {
            target: target.to_string(),
            timestamp,
            packet_loss_rate: round2(non_negative(summary.packet_loss_rate)).min(100.0),
            avg_rtt: round2(non_negative(avg)),
            max_rtt: round2(non_negative(max)),
            min_rtt: round2(non_negative(min)),
            stddev_rtt: round2(sample_stddev(&triple)),
            jitter: jitter(jitter_samples),
        }
    }
}

/// Jitter of successive single-packet RTTs, rounded to 2 decimals
pub fn jitter(samples: &[ProbeSample]) -> f64 {
    let rtts: Vec<f64> = samples.iter().filter_map(ProbeSample::rtt_ms).collect();
    round2(sample_stddev(&rtts))
}

/// Sample standard deviation (Bessel's correction); 0.0 below two values
pub fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < MIN_STDDEV_SAMPLES {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);

    non_negative(variance.sqrt())
}

/// Round half away from zero to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
