//! Agent configuration
//!
//! Settings come from `NETWATCH_*` environment variables. InfluxDB
//! credentials have no defaults; everything else does.

use agent_lib::anomaly::{ForestConfig, DEFAULT_CONTAMINATION, DEFAULT_SEED, DEFAULT_TREES, MAX_SAMPLES};
use agent_lib::monitor::MonitorConfig;
use agent_lib::sink::{InfluxConfig, ANOMALY_SERIES, DEFAULT_ARCHIVE_PATH, DEFAULT_INFLUX_URL, METRICS_SERIES};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "NETWATCH";

/// Configuration problems that prevent the agent from starting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{0} must be set and non-empty")]
    Missing(&'static str),

    #[error("no targets configured")]
    NoTargets,

    #[error("target #{0} is empty")]
    EmptyTarget(usize),

    #[error("target {0} is listed more than once")]
    DuplicateTarget(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name used to tag structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// InfluxDB base URL
    #[serde(default = "default_influx_url")]
    pub influx_url: String,

    #[serde(default)]
    pub influx_token: String,

    #[serde(default)]
    pub influx_org: String,

    #[serde(default)]
    pub influx_bucket: String,

    /// Targets probed each cycle, in batch order
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,

    /// Packets per probe round
    #[serde(default = "default_probe_count")]
    pub probe_count: u16,

    /// Per-packet timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Pause between single-packet probes in milliseconds
    #[serde(default)]
    pub probe_gap_ms: u64,

    /// Pause between cycles in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Local JSON archive file
    #[serde(default = "default_archive_path")]
    pub archive_path: String,

    #[serde(default = "default_contamination")]
    pub anomaly_contamination: f64,

    #[serde(default = "default_trees")]
    pub anomaly_trees: usize,

    #[serde(default = "default_seed")]
    pub anomaly_seed: u64,

    /// Timeout for a single InfluxDB write in seconds
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "netwatch".to_string())
}

fn default_influx_url() -> String {
    DEFAULT_INFLUX_URL.to_string()
}

fn default_targets() -> Vec<String> {
    ["8.8.8.8", "8.8.4.4", "1.1.1.1", "192.168.0.1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_probe_count() -> u16 {
    4
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_probes() -> usize {
    4
}

fn default_archive_path() -> String {
    DEFAULT_ARCHIVE_PATH.to_string()
}

fn default_contamination() -> f64 {
    DEFAULT_CONTAMINATION
}

fn default_trees() -> usize {
    DEFAULT_TREES
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_write_timeout_secs() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(environment())
    }

    /// Load and validate configuration from an environment source
    pub fn from_environment(env: config::Environment) -> Result<Self, ConfigError> {
        let config = config::Config::builder().add_source(env).build()?;

        let mut agent: AgentConfig = config.try_deserialize()?;
        agent.normalize();
        agent.validate()?;
        Ok(agent)
    }

    /// Trim whitespace around list entries
    fn normalize(&mut self) {
        for target in &mut self.targets {
            *target = target.trim().to_string();
        }
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.influx_token.trim().is_empty() {
            return Err(ConfigError::Missing("NETWATCH_INFLUX_TOKEN"));
        }
        if self.influx_org.trim().is_empty() {
            return Err(ConfigError::Missing("NETWATCH_INFLUX_ORG"));
        }
        if self.influx_bucket.trim().is_empty() {
            return Err(ConfigError::Missing("NETWATCH_INFLUX_BUCKET"));
        }

        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if let Some(position) = self.targets.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyTarget(position + 1));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .targets
            .iter()
            .map(|t| t.trim())
            .find(|t| !seen.insert(*t))
        {
            return Err(ConfigError::DuplicateTarget(duplicate.to_string()));
        }

        if self.probe_count == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_probes",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.anomaly_contamination > 0.0 && self.anomaly_contamination <= 0.5) {
            return Err(ConfigError::Invalid {
                field: "anomaly_contamination",
                reason: format!("{} is outside (0, 0.5]", self.anomaly_contamination),
            });
        }
        if self.anomaly_trees == 0 {
            return Err(ConfigError::Invalid {
                field: "anomaly_trees",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.interval_secs),
            probe_count: self.probe_count,
            packet_gap: Duration::from_millis(self.probe_gap_ms),
            max_concurrent_probes: self.max_concurrent_probes,
            metrics_series: METRICS_SERIES.to_string(),
            anomaly_series: ANOMALY_SERIES.to_string(),
        }
    }

    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            n_trees: self.anomaly_trees,
            contamination: self.anomaly_contamination,
            max_samples: MAX_SAMPLES,
            seed: self.anomaly_seed,
        }
    }

    pub fn influx_config(&self) -> InfluxConfig {
        InfluxConfig::new(
            &self.influx_url,
            &self.influx_token,
            &self.influx_org,
            &self.influx_bucket,
        )
        .with_timeout(Duration::from_secs(self.write_timeout_secs))
    }
}

/// Environment source for `NETWATCH_*` variables
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("targets")
}
