//! Periodic network monitoring
//!
//! The monitor loop runs one cycle per interval: probe every target, compute
//! statistics, write them to the time-series sink and the archive, then run
//! anomaly detection over the batch and write the outliers.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{MonitorConfig, MonitorLoop, MonitorLoopBuilder, DEFAULT_INTERVAL, DEFAULT_MAX_CONCURRENT_PROBES};
