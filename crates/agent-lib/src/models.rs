//! Core data models for the network probe agent

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format used for archive timestamps (local time)
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a single probe packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeSample {
    /// Echo reply received after the given round-trip time in milliseconds
    Rtt(f64),
    /// Packet timed out or errored
    Lost,
}

impl ProbeSample {
    /// Round-trip time if the packet was answered with a usable value
    pub fn rtt_ms(&self) -> Option<f64> {
        match self {
            ProbeSample::Rtt(ms) if ms.is_finite() && *ms >= 0.0 => Some(*ms),
            _ => None,
        }
    }
}

/// Aggregate of one summary probe round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSummary {
    pub sent: u32,
    pub received: u32,
    /// Lost packets as a percentage of sent packets
    pub packet_loss_rate: f64,
    pub rtt_avg: Option<f64>,
    pub rtt_max: Option<f64>,
    pub rtt_min: Option<f64>,
}

impl ProbeSummary {
    /// Summarize a round of samples
    pub fn from_samples(samples: &[ProbeSample]) -> Self {
        let rtts: Vec<f64> = samples.iter().filter_map(ProbeSample::rtt_ms).collect();
        let sent = samples.len() as u32;
        let received = rtts.len() as u32;

        let packet_loss_rate = if sent == 0 {
            0.0
        } else {
            f64::from(sent - received) / f64::from(sent) * 100.0
        };

        let (rtt_avg, rtt_max, rtt_min) = if rtts.is_empty() {
            (None, None, None)
        } else {
            let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
            let max = rtts.iter().copied().fold(f64::MIN, f64::max);
            let min = rtts.iter().copied().fold(f64::MAX, f64::min);
            (Some(avg), Some(max), Some(min))
        };

        Self {
            sent,
            received,
            packet_loss_rate,
            rtt_avg,
            rtt_max,
            rtt_min,
        }
    }
}

/// Per-target statistics for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub packet_loss_rate: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub min_rtt: f64,
    pub stddev_rtt: f64,
    pub jitter: f64,
}

impl StatRecord {
    /// Record with every numeric field at its default, used when probing failed
    pub fn unreachable(target: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            target: target.into(),
            timestamp,
            packet_loss_rate: 0.0,
            avg_rtt: 0.0,
            max_rtt: 0.0,
            min_rtt: 0.0,
            stddev_rtt: 0.0,
            jitter: 0.0,
        }
    }

    /// Time-series point for this record
    pub fn to_point(&self, measurement: &str) -> Point {
        Point::new(measurement, self.timestamp)
            .tag("ip", &self.target)
            .field("packet_loss", self.packet_loss_rate)
            .field("avg_rtt", self.avg_rtt)
            .field("max_rtt", self.max_rtt)
            .field("min_rtt", self.min_rtt)
            .field("stddev", self.stddev_rtt)
            .field("jitter", self.jitter)
    }
}

/// Statistics of a record the anomaly detector labelled as an outlier
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub avg_rtt: f64,
    pub stddev_rtt: f64,
    pub jitter: f64,
}

impl AnomalyRecord {
    pub fn to_point(&self, measurement: &str) -> Point {
        Point::new(measurement, self.timestamp)
            .tag("ip", &self.target)
            .field("avg_rtt", self.avg_rtt)
            .field("stddev", self.stddev_rtt)
            .field("jitter", self.jitter)
    }
}

impl From<&StatRecord> for AnomalyRecord {
    fn from(record: &StatRecord) -> Self {
        Self {
            target: record.target.clone(),
            timestamp: record.timestamp,
            avg_rtt: record.avg_rtt,
            stddev_rtt: record.stddev_rtt,
            jitter: record.jitter,
        }
    }
}

/// A single timestamped, tagged time-series point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a numeric field; non-finite values are written as 0.0
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        self.fields.insert(key.into(), value);
        self
    }
}

/// Flat object stored in the JSON archive file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub ip: String,
    pub timestamp: String,
    #[serde(default)]
    pub packet_loss: f64,
    #[serde(default)]
    pub avg_rtt: f64,
    #[serde(default)]
    pub max_rtt: f64,
    #[serde(default)]
    pub min_rtt: f64,
    #[serde(default, alias = "stddev_rtt")]
    pub stddev: f64,
    #[serde(default)]
    pub jitter: f64,
}

impl From<&StatRecord> for ArchiveEntry {
    fn from(record: &StatRecord) -> Self {
        Self {
            ip: record.target.clone(),
            timestamp: record
                .timestamp
                .with_timezone(&Local)
                .format(ARCHIVE_TIMESTAMP_FORMAT)
                .to_string(),
            packet_loss: record.packet_loss_rate,
            avg_rtt: record.avg_rtt,
            max_rtt: record.max_rtt,
            min_rtt: record.min_rtt,
            stddev: record.stddev_rtt,
            jitter: record.jitter,
        }
    }
}

/// Summary of a completed monitoring cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Statistics produced this cycle, in target order
    pub records: Vec<StatRecord>,
    /// Outliers found in this cycle's batch
    pub anomalies: Vec<AnomalyRecord>,
    pub probe_failures: usize,
    pub sink_failures: usize,
    /// Whether the batch reached the archive file
    pub archived: bool,
}
