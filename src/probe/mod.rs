//! Probe module for connectivity checks.
//!
//! Supports UDP (DNS port) reachability and HTTP GET probes. A probe never
//! fails outward: every outcome becomes a [`Sample`].

mod dns;
mod http;

pub use dns::*;
pub use http::*;

use crate::config::MonitorConfig;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Fixed bound applied to every probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sample counter for unique identification
static SAMPLE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Which kind of probe produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Http,
}

/// Outcome of one probe against one target.
///
/// A latency is only ever present on a successful sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    id: u64,
    protocol: Protocol,
    target: String,
    latency: Option<Duration>,
}

impl Sample {
    pub fn success(protocol: Protocol, target: impl Into<String>, latency: Duration) -> Self {
        Self::new(protocol, target.into(), Some(latency))
    }

    pub fn failure(protocol: Protocol, target: impl Into<String>) -> Self {
        Self::new(protocol, target.into(), None)
    }

    fn new(protocol: Protocol, target: String, latency: Option<Duration>) -> Self {
        Self {
            id: SAMPLE_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            protocol,
            target,
            latency,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_success(&self) -> bool {
        self.latency.is_some()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// All samples gathered by one scheduling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCycleResult {
    pub timestamp: DateTime<Utc>,
    pub udp_samples: Vec<Sample>,
    pub http_samples: Vec<Sample>,
}

impl ProbeCycleResult {
    /// Iterate over every sample of the cycle, UDP first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.udp_samples.iter().chain(self.http_samples.iter())
    }
}

/// The probe primitives the monitor depends on.
pub trait Prober: Send + Sync + 'static {
    /// Check UDP reachability of `host` on the DNS port.
    fn probe_udp(&self, host: &str) -> impl Future<Output = Sample> + Send;

    /// GET `url` and report whether it answered with 204 or any 2xx.
    fn probe_http(&self, url: &str) -> impl Future<Output = Sample> + Send;
}

/// Prober backed by real sockets and a shared HTTP client.
#[derive(Debug, Clone)]
pub struct NetProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetProber {
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

impl Prober for NetProber {
    async fn probe_udp(&self, host: &str) -> Sample {
        match run_dns_probe(host, self.timeout).await {
            Ok(latency) => Sample::success(Protocol::Udp, host, latency),
            Err(e) => {
                tracing::debug!("UDP probe failed for {}: {}", host, e);
                Sample::failure(Protocol::Udp, host)
            }
        }
    }

    async fn probe_http(&self, url: &str) -> Sample {
        match run_http_probe(&self.client, url, self.timeout).await {
            Ok(latency) => Sample::success(Protocol::Http, url, latency),
            Err(e) => {
                tracing::debug!("HTTP probe failed for {}: {}", url, e);
                Sample::failure(Protocol::Http, url)
            }
        }
    }
}

/// Run one probe cycle: every configured target, all concurrently.
///
/// The result is assembled only once every probe has completed.
pub async fn run_cycle<P: Prober>(prober: &P, config: &MonitorConfig) -> ProbeCycleResult {
    let timestamp = Utc::now();

    let udp = join_all(config.udp_targets.iter().map(|host| prober.probe_udp(host)));
    let http = join_all(config.http_targets.iter().map(|url| prober.probe_http(url)));
    let (udp_samples, http_samples) = futures_util::future::join(udp, http).await;

    tracing::debug!(
        "Probe cycle: {}/{} UDP ok, {}/{} HTTP ok",
        udp_samples.iter().filter(|s| s.is_success()).count(),
        udp_samples.len(),
        http_samples.iter().filter(|s| s.is_success()).count(),
        http_samples.len()
    );

    ProbeCycleResult {
        timestamp,
        udp_samples,
        http_samples,
    }
}
