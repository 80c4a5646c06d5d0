//! Observability infrastructure for the network agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, probe latency, failure counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for whole-cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

/// Histogram buckets for single-target probe durations (in seconds)
const PROBE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    cycle_duration_seconds: Histogram,
    probe_duration_seconds: Histogram,
    targets_monitored: IntGauge,
    probe_failures: IntCounter,
    sink_write_failures: IntCounter,
    archive_failures: IntCounter,
    anomalies_detected: IntCounter,
    cycles_completed: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "netwatch_cycle_duration_seconds",
                "Time spent on one full probe/compute/write/detect cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            probe_duration_seconds: register_histogram!(
                "netwatch_probe_duration_seconds",
                "Time spent probing a single target",
                PROBE_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_duration_seconds"),

            targets_monitored: register_int_gauge!(
                "netwatch_targets_monitored",
                "Number of targets probed each cycle"
            )
            .expect("Failed to register targets_monitored"),

            probe_failures: register_int_counter!(
                "netwatch_probe_failures_total",
                "Targets whose probe failed at the transport level"
            )
            .expect("Failed to register probe_failures"),

            sink_write_failures: register_int_counter!(
                "netwatch_sink_write_failures_total",
                "Points the time-series store did not accept"
            )
            .expect("Failed to register sink_write_failures"),

            archive_failures: register_int_counter!(
                "netwatch_archive_failures_total",
                "Batches that could not be appended to the local archive"
            )
            .expect("Failed to register archive_failures"),

            anomalies_detected: register_int_counter!(
                "netwatch_anomalies_detected_total",
                "Total number of anomalous records detected"
            )
            .expect("Failed to register anomalies_detected"),

            cycles_completed: register_int_counter!(
                "netwatch_cycles_completed_total",
                "Total number of completed monitoring cycles"
            )
            .expect("Failed to register cycles_completed"),
        }
    }
}

/// Agent metrics handle
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_probe_duration(&self, duration_secs: f64) {
        self.inner().probe_duration_seconds.observe(duration_secs);
    }

    pub fn set_targets_monitored(&self, count: i64) {
        self.inner().targets_monitored.set(count);
    }

    pub fn inc_probe_failures(&self) {
        self.inner().probe_failures.inc();
    }

    pub fn inc_sink_write_failures(&self) {
        self.inner().sink_write_failures.inc();
    }

    pub fn inc_archive_failures(&self) {
        self.inner().archive_failures.inc();
    }

    /// Add a batch of detected anomalies
    pub fn add_anomalies_detected(&self, count: u64) {
        self.inner().anomalies_detected.inc_by(count);
    }

    pub fn inc_cycles_completed(&self) {
        self.inner().cycles_completed.inc();
    }

    /// Completed cycles so far
    pub fn cycles_completed(&self) -> u64 {
        self.inner().cycles_completed.get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for cycles, anomalies and
/// failures, tagged with the host the agent runs on.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, targets: &[String], interval_secs: u64) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            targets = ?targets,
            interval_secs = interval_secs,
            "Network agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Network agent shutting down"
        );
    }

    /// Log the outcome of one cycle
    pub fn log_cycle(
        &self,
        records: usize,
        anomalies: usize,
        probe_failures: usize,
        sink_failures: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "cycle_completed",
            node = %self.node_name,
            records = records,
            anomalies = anomalies,
            probe_failures = probe_failures,
            sink_failures = sink_failures,
            duration_ms = duration_ms,
            "Monitoring cycle completed"
        );
    }

    /// Log an anomalous record
    pub fn log_anomaly(&self, target: &str, avg_rtt: f64, stddev_rtt: f64, jitter: f64) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            target = %target,
            avg_rtt = avg_rtt,
            stddev_rtt = stddev_rtt,
            jitter = jitter,
            "Network anomaly detected"
        );
    }

    /// Log a target whose probe failed outright
    pub fn log_probe_failure(&self, target: &str, error: &str) {
        warn!(
            event = "probe_failed",
            node = %self.node_name,
            target = %target,
            error = %error,
            "Probe failed, recording unreachable target"
        );
    }

    /// Log a point the time-series store did not accept
    pub fn log_sink_failure(&self, measurement: &str, target: &str, error: &str) {
        warn!(
            event = "sink_write_failed",
            node = %self.node_name,
            measurement = %measurement,
            target = %target,
            error = %error,
            "Failed to write point"
        );
    }
}
