//! ICMP echo prober
//!
//! Sends echo requests with `surge-ping`. Each packet is bounded by its own
//! timeout; a timed-out or failed packet counts as lost.

use super::{async_trait, ProbeError, Prober};
use crate::models::ProbeSample;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-packet timeout (1 second)
pub const DEFAULT_PACKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Payload size matching the classic `ping` default
const PAYLOAD_SIZE: usize = 56;

/// Resolve a hostname or literal address to an IP address
pub async fn resolve_host(host: &str) -> Result<IpAddr, std::io::Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs = tokio::net::lookup_host(format!("{host}:0")).await?;
    addrs
        .into_iter()
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

/// Prober sending ICMP echo requests
///
/// One socket per address family is opened on first use and shared by every
/// later probe.
pub struct IcmpProber {
    packet_timeout: Duration,
    payload: Vec<u8>,
    v4_client: OnceCell<Client>,
    v6_client: OnceCell<Client>,
}

impl IcmpProber {
    pub fn new(packet_timeout: Duration) -> Self {
        Self {
            packet_timeout,
            payload: vec![0; PAYLOAD_SIZE],
            v4_client: OnceCell::new(),
            v6_client: OnceCell::new(),
        }
    }

    pub fn packet_timeout(&self) -> Duration {
        self.packet_timeout
    }

    async fn client_for(&self, ip: IpAddr) -> Result<Client, ProbeError> {
        let (cell, config) = match ip {
            IpAddr::V4(_) => (&self.v4_client, Config::default()),
            IpAddr::V6(_) => (&self.v6_client, Config::builder().kind(ICMP::V6).build()),
        };
        cell.get_or_try_init(|| async { Client::new(&config).map_err(ProbeError::Socket) })
            .await
            .cloned()
    }
}

impl std::fmt::Debug for IcmpProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpProber")
            .field("packet_timeout", &self.packet_timeout)
            .field("payload_size", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PACKET_TIMEOUT)
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn resolve(&self, target: &str) -> Result<String, ProbeError> {
        let ip = resolve_host(target)
            .await
            .map_err(|source| ProbeError::Resolve {
                target: target.to_string(),
                source,
            })?;
        Ok(ip.to_string())
    }

    async fn probe(&self, target: &str, count: u16) -> Result<Vec<ProbeSample>, ProbeError> {
        let ip = resolve_host(target)
            .await
            .map_err(|source| ProbeError::Resolve {
                target: target.to_string(),
                source,
            })?;

        let client = self.client_for(ip).await?;
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.packet_timeout);

        let mut samples = Vec::with_capacity(count as usize);
        for seq in 0..count {
            let result = timeout(
                self.packet_timeout,
                pinger.ping(PingSequence(seq), &self.payload),
            )
            .await;

            let sample = match result {
                Ok(Ok((_, rtt))) => ProbeSample::Rtt(rtt.as_secs_f64() * 1000.0),
                Ok(Err(e)) => {
                    debug!(target = %target, seq, error = %e, "Echo request failed");
                    ProbeSample::Lost
                }
                Err(_) => {
                    debug!(
                        target = %target,
                        seq,
                        timeout_ms = self.packet_timeout.as_millis() as u64,
                        "Echo request timed out"
                    );
                    ProbeSample::Lost
                }
            };
            samples.push(sample);
        }

        if samples.iter().all(|s| s.rtt_ms().is_none()) && count > 0 {
            warn!(target = %target, ip = %ip, "No echo replies received");
        }

        Ok(samples)
    }
}
