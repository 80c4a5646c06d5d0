//! Persistence of probe statistics
//!
//! This module provides:
//! - The [`MetricsSink`] write interface for time-series points
//! - An InfluxDB v2 HTTP writer using line protocol
//! - An append-only JSON archive file for local history

mod archive;
mod influx;


pub use archive::{ArchiveError, JsonArchive, DEFAULT_ARCHIVE_PATH};
pub use influx::{
    escape_key, escape_measurement, escape_tag_value, line_protocol, InfluxConfig, InfluxWriter,
    DEFAULT_INFLUX_URL, DEFAULT_WRITE_TIMEOUT,
};

use crate::models::Point;
use thiserror::Error;

pub use async_trait::async_trait;

/// Default series for per-target statistics
pub const METRICS_SERIES: &str = "ping_metrics";

/// Default series for anomalous records
pub const ANOMALY_SERIES: &str = "anomaly_metrics";

/// Failures writing a point to the time-series store
#[derive(Debug, Error)]
pub enum SinkError {
    /// Store could not be reached
    #[error("time-series store unreachable: {0}")]
    Unreachable(String),

    /// Store answered with a non-success status
    #[error("time-series store rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Sink misconfigured (bad URL and the like)
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
}

/// Write interface to the time-series store
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit one point
    async fn write_point(&self, point: &Point) -> Result<(), SinkError>;
}
