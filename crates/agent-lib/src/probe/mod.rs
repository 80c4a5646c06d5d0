//! Network probing
//!
//! A [`Prober`] sends echo requests to a target and reports one
//! [`ProbeSample`] per packet. [`ProbeRunner`] drives the two independent
//! rounds needed per target: a summary round for loss/avg/max/min and a
//! round of single-packet probes for jitter.

mod icmp;


pub use icmp::{resolve_host, IcmpProber, DEFAULT_PACKET_TIMEOUT};

use crate::models::{ProbeSample, ProbeSummary};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use async_trait::async_trait;

/// Default number of packets per probe round
pub const DEFAULT_PROBE_COUNT: u16 = 4;

/// Transport-level failures that abort probing a target
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Target is empty or otherwise unusable
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    /// Hostname could not be resolved
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// ICMP socket could not be opened
    #[error("failed to open ICMP socket: {0}")]
    Socket(#[source] std::io::Error),
}

/// Trait for probe transport implementations
#[async_trait]
pub trait Prober: Send + Sync {
    /// Pin `target` to the address every round of a cycle will probe
    ///
    /// The default keeps the target as given.
    async fn resolve(&self, target: &str) -> Result<String, ProbeError> {
        Ok(target.to_string())
    }

    /// Send `count` echo requests to `target`, returning one sample per packet
    ///
    /// Packets that time out or error are reported as [`ProbeSample::Lost`];
    /// only transport failures return an error.
    async fn probe(&self, target: &str, count: u16) -> Result<Vec<ProbeSample>, ProbeError>;
}

/// Raw output of probing one target
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Aggregate of the summary round
    pub summary: ProbeSummary,
    /// Samples of the single-packet round, in send order
    pub jitter_samples: Vec<ProbeSample>,
}

/// Runs the summary and jitter rounds against a target
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    count: u16,
    packet_gap: Duration,
}

impl ProbeRunner {
    pub fn new(count: u16) -> Self {
        Self {
            count,
            packet_gap: Duration::ZERO,
        }
    }

    /// Pause between the single-packet probes of the jitter round
    pub fn with_packet_gap(mut self, gap: Duration) -> Self {
        self.packet_gap = gap;
        self
    }

    /// Probe one target
    ///
    /// The target is resolved once so both rounds reach the same address.
    /// Any transport error in either round aborts the whole target.
    pub async fn run(&self, prober: &dyn Prober, target: &str) -> Result<ProbeOutcome, ProbeError> {
        if target.trim().is_empty() {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }

        let address = prober.resolve(target).await?;

        let summary_samples = prober.probe(&address, self.count).await?;
        let summary = ProbeSummary::from_samples(&summary_samples);

        let mut jitter_samples = Vec::with_capacity(self.count as usize);
        for i in 0..self.count {
            if i > 0 && !self.packet_gap.is_zero() {
                tokio::time::sleep(self.packet_gap).await;
            }
            let mut samples = prober.probe(&address, 1).await?;
            jitter_samples.push(samples.pop().unwrap_or(ProbeSample::Lost));
        }

        debug!(
            target = %target,
            address = %address,
            sent = summary.sent,
            received = summary.received,
            jitter_samples = jitter_samples.len(),
            "Probe rounds complete"
        );

        Ok(ProbeOutcome {
            summary,
            jitter_samples,
        })
    }
}

impl Default for ProbeRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_COUNT)
    }
}
