//! Integration tests for the monitoring loop
//!
//! These tests drive full cycles with a scripted prober and a recording sink,
//! without touching the network.

use super::*;
use crate::models::{Point, ProbeSample};
use crate::probe::{async_trait, ProbeError, Prober};
use crate::sink::{JsonArchive, MetricsSink, SinkError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Prober answering from a per-target RTT script
///
/// Summary rounds return the whole script; single-packet rounds walk through
/// it one value at a time.
struct ScriptedProber {
    rtts: HashMap<String, Vec<f64>>,
    delays: HashMap<String, Duration>,
    cursors: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    fn new() -> Self {
        Self {
            rtts: HashMap::new(),
            delays: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn target(mut self, target: &str, rtts: &[f64]) -> Self {
        self.rtts.insert(target.to_string(), rtts.to_vec());
        self
    }

    fn delayed(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(target.to_string(), delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &str, count: u16) -> Result<Vec<ProbeSample>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(target) {
            tokio::time::sleep(*delay).await;
        }

        let rtts = self.rtts.get(target).ok_or_else(|| ProbeError::Resolve {
            target: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"),
        })?;

        if count > 1 {
            return Ok(rtts.iter().map(|rtt| ProbeSample::Rtt(*rtt)).collect());
        }

        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(target.to_string()).or_insert(0);
        let rtt = rtts[*cursor % rtts.len()];
        *cursor += 1;
        Ok(vec![ProbeSample::Rtt(rtt)])
    }
}

/// Sink recording every accepted point, failing for one target
#[derive(Default)]
struct RecordingSink {
    points: Mutex<Vec<Point>>,
    fail_for: Option<String>,
}

impl RecordingSink {
    fn failing_for(target: &str) -> Self {
        Self {
            points: Mutex::new(Vec::new()),
            fail_for: Some(target.to_string()),
        }
    }

    fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    fn points_in(&self, measurement: &str) -> Vec<Point> {
        self.points()
            .into_iter()
            .filter(|p| p.measurement == measurement)
            .collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        if self.fail_for.as_deref() == point.tags.get("ip").map(String::as_str) {
            return Err(SinkError::Unreachable("connection refused".to_string()));
        }
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

const RTTS: [f64; 4] = [10.0, 12.0, 11.0, 9.0];

fn build_loop(
    targets: &[&str],
    prober: Arc<ScriptedProber>,
    sink: Arc<RecordingSink>,
) -> MonitorLoop {
    MonitorLoopBuilder::new()
        .targets(targets.iter().copied())
        .prober(prober)
        .sink(sink)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_cycle() {
    let prober = Arc::new(
        ScriptedProber::new()
            .target("8.8.8.8", &RTTS)
            .target("1.1.1.1", &RTTS),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = build_loop(&["8.8.8.8", "1.1.1.1"], prober.clone(), sink.clone());

    let report = monitor.run_cycle().await;

    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].target, "8.8.8.8");
    assert_eq!(report.records[1].target, "1.1.1.1");
    for record in &report.records {
        assert_eq!(record.avg_rtt, 10.5);
        assert_eq!(record.max_rtt, 12.0);
        assert_eq!(record.min_rtt, 9.0);
        assert_eq!(record.packet_loss_rate, 0.0);
        assert_eq!(record.stddev_rtt, 1.5);
        assert_eq!(record.jitter, 1.29);
    }

    // Two identical rows never produce an outlier
    assert!(report.anomalies.is_empty());
    assert_eq!(report.probe_failures, 0);
    assert_eq!(report.sink_failures, 0);
    assert!(!report.archived);

    // One summary round plus four single-packet probes per target
    assert_eq!(prober.calls(), 10);

    let written = sink.points_in("ping_metrics");
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].tags.get("ip").map(String::as_str), Some("8.8.8.8"));
    assert_eq!(written[0].fields.get("stddev"), Some(&1.5));
    assert_eq!(written[0].timestamp, report.records[0].timestamp);
    assert!(sink.points_in("anomaly_metrics").is_empty());
}

#[tokio::test]
async fn test_probe_failure_yields_unreachable_record() {
    let prober = Arc::new(ScriptedProber::new().target("8.8.8.8", &RTTS));
    let sink = Arc::new(RecordingSink::default());
    let mut monitor = build_loop(&["no-such-host.invalid", "8.8.8.8"], prober, sink.clone());

    let report = monitor.run_cycle().await;

    assert_eq!(report.probe_failures, 1);
    assert_eq!(report.records.len(), 2);

    let failed = &report.records[0];
    assert_eq!(failed.target, "no-such-host.invalid");
    assert_eq!(failed.packet_loss_rate, 0.0);
    assert_eq!(failed.avg_rtt, 0.0);
    assert_eq!(failed.max_rtt, 0.0);
    assert_eq!(failed.min_rtt, 0.0);
    assert_eq!(failed.stddev_rtt, 0.0);
    assert_eq!(failed.jitter, 0.0);

    assert_eq!(report.records[1].avg_rtt, 10.5);

    // The default record is still written
    assert_eq!(sink.points_in("ping_metrics").len(), 2);
}

#[tokio::test]
async fn test_sink_failure_does_not_block_other_targets() {
    let prober = Arc::new(
        ScriptedProber::new()
            .target("8.8.8.8", &RTTS)
            .target("1.1.1.1", &RTTS)
            .target("8.8.4.4", &RTTS),
    );
    let sink = Arc::new(RecordingSink::failing_for("8.8.8.8"));
    let mut monitor = build_loop(&["8.8.8.8", "1.1.1.1", "8.8.4.4"], prober, sink.clone());

    let report = monitor.run_cycle().await;

    assert_eq!(report.sink_failures, 1);
    let ips: Vec<String> = sink
        .points_in("ping_metrics")
        .into_iter()
        .filter_map(|p| p.tags.get("ip").cloned())
        .collect();
    assert_eq!(ips, vec!["1.1.1.1", "8.8.4.4"]);
}

#[tokio::test]
async fn test_batch_keeps_target_order_under_concurrency() {
    let targets = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6"];
    let mut scripted = ScriptedProber::new();
    for (i, target) in targets.iter().enumerate() {
        // Earlier targets answer slower
        scripted = scripted
            .target(target, &RTTS)
            .delayed(target, Duration::from_millis(((targets.len() - i) * 3) as u64));
    }
    let sink = Arc::new(RecordingSink::default());

    let mut monitor = MonitorLoopBuilder::new()
        .targets(targets)
        .prober(Arc::new(scripted))
        .sink(sink)
        .max_concurrent_probes(3)
        .build()
        .unwrap();

    let report = monitor.run_cycle().await;

    let order: Vec<&str> = report.records.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(order, targets);
}

#[tokio::test]
async fn test_anomalies_written_to_anomaly_series() {
    let mut scripted = ScriptedProber::new();
    let mut targets: Vec<String> = (1..=9).map(|i| format!("10.0.0.{}", i)).collect();
    for target in &targets {
        scripted = scripted.target(target, &RTTS);
    }
    scripted = scripted.target("10.0.0.99", &[500.0, 502.0, 501.0, 499.0]);
    targets.insert(3, "10.0.0.99".to_string());

    let sink = Arc::new(RecordingSink::default());
    let mut monitor = MonitorLoopBuilder::new()
        .targets(targets.clone())
        .prober(Arc::new(scripted))
        .sink(sink.clone())
        .build()
        .unwrap();

    let report = monitor.run_cycle().await;

    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].target, "10.0.0.99");
    assert_eq!(report.anomalies[0].avg_rtt, 500.5);

    let anomalies = sink.points_in("anomaly_metrics");
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].tags.get("ip").map(String::as_str), Some("10.0.0.99"));
    assert_eq!(anomalies[0].fields.len(), 3);
    assert_eq!(sink.points_in("ping_metrics").len(), 10);
}

#[tokio::test]
async fn test_cycles_archive_and_keep_timestamps_ordered() {
    let temp_dir = TempDir::new().unwrap();
    let archive = Arc::new(JsonArchive::new(temp_dir.path().join("network_metrics.json")));
    let prober = Arc::new(
        ScriptedProber::new()
            .target("8.8.8.8", &RTTS)
            .target("1.1.1.1", &RTTS),
    );

    let mut monitor = MonitorLoopBuilder::new()
        .targets(["8.8.8.8", "1.1.1.1"])
        .prober(prober)
        .sink(Arc::new(RecordingSink::default()))
        .archive(archive.clone())
        .build()
        .unwrap();

    let first = monitor.run_cycle().await;
    let second = monitor.run_cycle().await;

    assert!(first.archived);
    assert!(second.archived);
    // Consecutive cycles never share a timestamp
    assert!(second.records[0].timestamp > first.records[0].timestamp);

    let entries = archive.load();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].ip, "8.8.8.8");
    assert_eq!(entries[3].ip, "1.1.1.1");
    assert_eq!(entries[2].avg_rtt, 10.5);
}

#[tokio::test]
async fn test_archive_failure_is_not_fatal() {
    let temp_dir = TempDir::new().unwrap();
    // A directory standing where the archive file should be
    let path = temp_dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();

    let sink = Arc::new(RecordingSink::default());
    let mut monitor = MonitorLoopBuilder::new()
        .targets(["8.8.8.8"])
        .prober(Arc::new(ScriptedProber::new().target("8.8.8.8", &RTTS)))
        .sink(sink.clone())
        .archive(Arc::new(JsonArchive::new(&path)))
        .build()
        .unwrap();

    let report = monitor.run_cycle().await;

    assert!(!report.archived);
    assert_eq!(sink.points_in("ping_metrics").len(), 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let prober = Arc::new(ScriptedProber::new().target("8.8.8.8", &RTTS));
    let monitor = MonitorLoopBuilder::new()
        .targets(["8.8.8.8"])
        .prober(prober.clone())
        .sink(Arc::new(RecordingSink::default()))
        .interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    shutdown_tx.send(()).unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    // The first cycle always completes before the signal is observed
    assert_eq!(cycles, 1);
    assert_eq!(prober.calls(), 5);
}

#[test]
fn test_builder_rejects_duplicate_targets() {
    let prober: Arc<dyn Prober> = Arc::new(ScriptedProber::new());
    let sink: Arc<dyn MetricsSink> = Arc::new(RecordingSink::default());

    assert!(MonitorLoopBuilder::new()
        .targets(["8.8.8.8", "8.8.8.8"])
        .prober(prober.clone())
        .sink(sink.clone())
        .build()
        .is_err());

    // Whitespace does not make a target distinct
    let err = MonitorLoopBuilder::new()
        .targets(["8.8.8.8", "1.1.1.1", " 8.8.8.8 "])
        .prober(prober)
        .sink(sink)
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("8.8.8.8"));
}

#[test]
fn test_monitor_config_default() {
    let config = MonitorConfig::default();
    assert_eq!(config.interval, Duration::from_secs(30));
    assert_eq!(config.probe_count, 4);
    assert_eq!(config.max_concurrent_probes, 4);
    assert_eq!(config.metrics_series, "ping_metrics");
    assert_eq!(config.anomaly_series, "anomaly_metrics");
}

#[test]
fn test_builder_requires_parts() {
    let prober: Arc<dyn Prober> = Arc::new(ScriptedProber::new());
    let sink: Arc<dyn MetricsSink> = Arc::new(RecordingSink::default());

    assert!(MonitorLoopBuilder::new()
        .targets(["8.8.8.8"])
        .sink(sink.clone())
        .build()
        .is_err());
    assert!(MonitorLoopBuilder::new()
        .targets(["8.8.8.8"])
        .prober(prober.clone())
        .build()
        .is_err());
    assert!(MonitorLoopBuilder::new()
        .prober(prober.clone())
        .sink(sink.clone())
        .build()
        .is_err());
    assert!(MonitorLoopBuilder::new()
        .targets(["8.8.8.8", " "])
        .prober(prober.clone())
        .sink(sink.clone())
        .build()
        .is_err());
    assert!(MonitorLoopBuilder::new()
        .targets(["8.8.8.8"])
        .prober(prober.clone())
        .sink(sink.clone())
        .probe_count(0)
        .build()
        .is_err());

    let monitor = MonitorLoopBuilder::new()
        .targets(["8.8.8.8", "1.1.1.1"])
        .prober(prober)
        .sink(sink)
        .build()
        .unwrap();
    assert_eq!(monitor.targets(), ["8.8.8.8", "1.1.1.1"]);
}
