//! Monitoring loop
//!
//! Drives the probe → compute → write → detect pipeline at a fixed interval.
//! Within a cycle, targets are probed in parallel up to a concurrency limit;
//! results land in per-target slots so the batch keeps configured order.

use crate::anomaly::AnomalyDetector;
use crate::models::{CycleReport, Point, StatRecord};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::probe::{ProbeError, ProbeOutcome, ProbeRunner, Prober, DEFAULT_PROBE_COUNT};
use crate::sink::{JsonArchive, MetricsSink, ANOMALY_SERIES, METRICS_SERIES};
use crate::stats::MetricComputer;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default pause between cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of targets probed at once
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 4;

/// Configuration for the monitoring loop
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between the end of one cycle and the start of the next (default: 30 seconds)
    pub interval: Duration,
    /// Packets per probe round (default: 4)
    pub probe_count: u16,
    /// Pause between single-packet probes of the jitter round (default: none)
    pub packet_gap: Duration,
    /// Targets probed at once (default: 4)
    pub max_concurrent_probes: usize,
    /// Series for per-target statistics
    pub metrics_series: String,
    /// Series for anomalous records
    pub anomaly_series: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            probe_count: DEFAULT_PROBE_COUNT,
            packet_gap: Duration::ZERO,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            metrics_series: METRICS_SERIES.to_string(),
            anomaly_series: ANOMALY_SERIES.to_string(),
        }
    }
}

/// Periodic monitor over a fixed target list
pub struct MonitorLoop {
    targets: Vec<String>,
    prober: Arc<dyn Prober>,
    runner: ProbeRunner,
    computer: MetricComputer,
    sink: Arc<dyn MetricsSink>,
    archive: Option<Arc<JsonArchive>>,
    detector: AnomalyDetector,
    config: MonitorConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    /// Timestamp of the previous cycle, keeps timestamps non-decreasing
    last_timestamp: Option<DateTime<Utc>>,
}

impl MonitorLoop {
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Run cycles until a shutdown signal arrives
    ///
    /// A cycle in progress always completes; the signal is observed while
    /// waiting for the next one. Returns the number of completed cycles.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(
            interval_secs = self.config.interval.as_secs(),
            targets = self.targets.len(),
            "Starting network monitoring loop"
        );

        let mut cycles = 0u64;

        loop {
            let report = self.run_cycle().await;
            cycles += 1;

            debug!(
                cycle = cycles,
                records = report.records.len(),
                anomalies = report.anomalies.len(),
                archived = report.archived,
                "Cycle finished, waiting for next"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => {
                    info!(cycles = cycles, "Shutting down network monitoring loop");
                    break;
                }
            }
        }

        cycles
    }

    /// Execute one full cycle over every target
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        let timestamp = self.next_timestamp();
        let mut report = CycleReport::default();

        self.metrics.set_targets_monitored(self.targets.len() as i64);

        let outcomes = self.probe_all().await;
        for (target, outcome) in self.targets.iter().zip(outcomes) {
            let record = match outcome {
                Some(Ok(outcome)) => self.computer.compute(
                    target,
                    timestamp,
                    &outcome.summary,
                    &outcome.jitter_samples,
                ),
                Some(Err(e)) => {
                    report.probe_failures += 1;
                    self.metrics.inc_probe_failures();
                    self.logger.log_probe_failure(target, &e.to_string());
                    StatRecord::unreachable(target.as_str(), timestamp)
                }
                None => {
                    report.probe_failures += 1;
                    self.metrics.inc_probe_failures();
                    self.logger.log_probe_failure(target, "probe task aborted");
                    StatRecord::unreachable(target.as_str(), timestamp)
                }
            };
            report.records.push(record);
        }

        for record in &report.records {
            let point = record.to_point(&self.config.metrics_series);
            if !self.write(&point, &record.target).await {
                report.sink_failures += 1;
            }
        }

        report.archived = self.archive_batch(&report.records).await;

        report.anomalies = self.detector.detect(&report.records);
        self.metrics
            .add_anomalies_detected(report.anomalies.len() as u64);
        for anomaly in &report.anomalies {
            self.logger
                .log_anomaly(&anomaly.target, anomaly.avg_rtt, anomaly.stddev_rtt, anomaly.jitter);
            let point = anomaly.to_point(&self.config.anomaly_series);
            if !self.write(&point, &anomaly.target).await {
                report.sink_failures += 1;
            }
        }

        let elapsed = start.elapsed();
        self.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        self.metrics.inc_cycles_completed();
        self.logger.log_cycle(
            report.records.len(),
            report.anomalies.len(),
            report.probe_failures,
            report.sink_failures,
            elapsed.as_millis() as u64,
        );

        report
    }

    /// Cycle timestamp, strictly after the previous cycle's
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let timestamp = clamp_timestamp(self.last_timestamp, Utc::now());
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Probe every target, one slot per target in configured order
    ///
    /// A slot left empty means the probe task panicked or was cancelled.
    async fn probe_all(&self) -> Vec<Option<Result<ProbeOutcome, ProbeError>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_probes.max(1)));
        let mut tasks = JoinSet::new();

        for (index, target) in self.targets.iter().enumerate() {
            let target = target.clone();
            let prober = Arc::clone(&self.prober);
            let runner = self.runner.clone();
            let semaphore = Arc::clone(&semaphore);
            let metrics = self.metrics.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let start = Instant::now();
                let result = runner.run(prober.as_ref(), &target).await;
                metrics.observe_probe_duration(start.elapsed().as_secs_f64());
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ProbeOutcome, ProbeError>>> =
            (0..self.targets.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        slots
    }

    /// Write one point, returning whether the sink accepted it
    async fn write(&self, point: &Point, target: &str) -> bool {
        match self.sink.write_point(point).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.inc_sink_write_failures();
                self.logger
                    .log_sink_failure(&point.measurement, target, &e.to_string());
                false
            }
        }
    }

    /// Append the batch to the archive file on a blocking thread
    async fn archive_batch(&self, records: &[StatRecord]) -> bool {
        let Some(archive) = self.archive.as_ref().map(Arc::clone) else {
            return false;
        };

        let batch = records.to_vec();
        match tokio::task::spawn_blocking(move || archive.append(&batch)).await {
            Ok(Ok(total)) => {
                debug!(entries = total, "Archive updated");
                true
            }
            Ok(Err(e)) => {
                self.metrics.inc_archive_failures();
                warn!(error = %e, "Failed to archive batch");
                false
            }
            Err(e) => {
                self.metrics.inc_archive_failures();
                warn!(error = %e, "Archive task failed");
                false
            }
        }
    }
}

/// Keep cycle timestamps strictly increasing
///
/// When the wall clock has not moved past `last` (e.g. after a clock step
/// backwards), the cycle is stamped one nanosecond after `last` so its points
/// never share a timestamp with the previous cycle's.
fn clamp_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if last >= now => last + chrono::Duration::nanoseconds(1),
        _ => now,
    }
}

/// Builder for creating the monitoring loop
pub struct MonitorLoopBuilder {
    targets: Vec<String>,
    prober: Option<Arc<dyn Prober>>,
    sink: Option<Arc<dyn MetricsSink>>,
    archive: Option<Arc<JsonArchive>>,
    detector: AnomalyDetector,
    logger: Option<StructuredLogger>,
    config: MonitorConfig,
}

impl MonitorLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            prober: None,
            sink: None,
            archive: None,
            detector: AnomalyDetector::default(),
            logger: None,
            config: MonitorConfig::default(),
        }
    }

    /// Set the targets probed each cycle, in batch order
    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Archive each batch to a local JSON file
    pub fn archive(mut self, archive: Arc<JsonArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the cycle interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the packets per probe round
    pub fn probe_count(mut self, count: u16) -> Self {
        self.config.probe_count = count;
        self
    }

    /// Set the concurrency limit for probing
    pub fn max_concurrent_probes(mut self, limit: usize) -> Self {
        self.config.max_concurrent_probes = limit;
        self
    }

    /// Build the monitoring loop
    pub fn build(self) -> Result<MonitorLoop> {
        let prober = self
            .prober
            .ok_or_else(|| anyhow::anyhow!("Prober is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Metrics sink is required"))?;

        if self.targets.is_empty() {
            anyhow::bail!("At least one target is required");
        }
        if let Some(position) = self.targets.iter().position(|t| t.trim().is_empty()) {
            anyhow::bail!("Target #{} is empty", position + 1);
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .targets
            .iter()
            .map(|t| t.trim())
            .find(|t| !seen.insert(*t))
        {
            anyhow::bail!("Target {} is listed more than once", duplicate);
        }
        if self.config.probe_count == 0 {
            anyhow::bail!("Probe count must be at least 1");
        }

        let runner =
            ProbeRunner::new(self.config.probe_count).with_packet_gap(self.config.packet_gap);

        Ok(MonitorLoop {
            targets: self.targets,
            prober,
            runner,
            computer: MetricComputer::new(),
            sink,
            archive: self.archive,
            detector: self.detector,
            config: self.config,
            metrics: AgentMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("netwatch")),
            last_timestamp: None,
        })
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
