//! Agent library for network latency monitoring
//!
//! This crate provides the core functionality for:
//! - ICMP probing of configured targets
//! - Latency statistics (loss, RTT spread, jitter)
//! - Time-series and archive persistence
//! - Isolation forest anomaly detection
//! - Observability for the agent itself

pub mod anomaly;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod probe;
pub mod sink;
pub mod stats;

pub use models::*;
pub use monitor::{MonitorConfig, MonitorLoop, MonitorLoopBuilder};
pub use observability::{AgentMetrics, StructuredLogger};
