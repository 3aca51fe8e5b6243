//! Connectivity reports and quality classification.

use crate::path::PathStatus;
use crate::probe::{ProbeCycleResult, Protocol, Sample};
use crate::stats::{jitter, latency, LatencyStats};
use crate::window::SlidingWindow;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Ordinal connection quality, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Fair,
    Poor,
    Disconnected,
}

/// Upper bounds on latency and jitter and lower bound on success rate.
struct Tier {
    quality: Quality,
    max_latency: Duration,
    max_jitter: Duration,
    min_rate: f64,
}

const TIERS: [Tier; 3] = [
    Tier {
        quality: Quality::Excellent,
        max_latency: Duration::from_millis(40),
        max_jitter: Duration::from_millis(10),
        min_rate: 0.995,
    },
    Tier {
        quality: Quality::Good,
        max_latency: Duration::from_millis(100),
        max_jitter: Duration::from_millis(30),
        min_rate: 0.98,
    },
    Tier {
        quality: Quality::Fair,
        max_latency: Duration::from_millis(250),
        max_jitter: Duration::from_millis(60),
        min_rate: 0.90,
    },
];

/// Classify connection quality. All bounds are inclusive and the first
/// matching tier wins.
pub fn classify(
    path_status: PathStatus,
    overall: Option<LatencyStats>,
    http_jitter: Duration,
    rate: f64,
) -> Quality {
    let overall = match (path_status, overall) {
        (PathStatus::Satisfied, Some(stats)) => stats,
        _ => return Quality::Disconnected,
    };

    TIERS
        .iter()
        .find(|t| {
            overall.mean <= t.max_latency && http_jitter <= t.max_jitter && rate >= t.min_rate
        })
        .map(|t| t.quality)
        .unwrap_or(Quality::Poor)
}

/// A point-in-time view of connectivity.
///
/// `dns_samples`/`http_samples` come from the most recent probe cycle only;
/// jitter, latency and rate cover the whole window.
#[derive(Debug, Clone)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub path_status: PathStatus,
    pub dns_samples: Vec<Sample>,
    pub http_samples: Vec<Sample>,
    pub dns_jitter: Duration,
    pub http_jitter: Duration,
    window: Arc<Vec<ProbeCycleResult>>,
}

impl Report {
    /// A report with no probe data yet.
    pub fn empty(timestamp: DateTime<Utc>, path_status: PathStatus) -> Self {
        Self {
            timestamp,
            path_status,
            dns_samples: Vec::new(),
            http_samples: Vec::new(),
            dns_jitter: Duration::ZERO,
            http_jitter: Duration::ZERO,
            window: Arc::new(Vec::new()),
        }
    }

    /// Build a report after `latest` has been pushed into `window`.
    pub fn from_window(
        timestamp: DateTime<Utc>,
        path_status: PathStatus,
        latest: &ProbeCycleResult,
        window: &SlidingWindow,
    ) -> Self {
        Self {
            timestamp,
            path_status,
            dns_samples: latest.udp_samples.clone(),
            http_samples: latest.http_samples.clone(),
            dns_jitter: jitter(&window.latencies(Protocol::Udp)),
            http_jitter: jitter(&window.latencies(Protocol::Http)),
            window: Arc::new(window.cycles().cloned().collect()),
        }
    }

    /// Same samples and jitter under a new path status.
    pub fn with_path(&self, timestamp: DateTime<Utc>, path_status: PathStatus) -> Self {
        Self {
            timestamp,
            path_status,
            ..self.clone()
        }
    }

    fn window_latencies(&self, protocol: Option<Protocol>) -> Vec<Duration> {
        self.window
            .iter()
            .flat_map(|c| c.samples())
            .filter(|s| protocol.is_none_or(|p| s.protocol() == p))
            .filter_map(Sample::latency)
            .collect()
    }

    /// Latency over every successful sample in the window.
    pub fn all(&self) -> Option<LatencyStats> {
        latency(&self.window_latencies(None))
    }

    pub fn dns(&self) -> Option<LatencyStats> {
        latency(&self.window_latencies(Some(Protocol::Udp)))
    }

    pub fn http(&self) -> Option<LatencyStats> {
        latency(&self.window_latencies(Some(Protocol::Http)))
    }

    /// Fraction of successful samples across the window; zero unless the
    /// path is satisfied.
    pub fn rate(&self) -> f64 {
        if self.path_status != PathStatus::Satisfied {
            return 0.0;
        }

        let (ok, total) = self
            .window
            .iter()
            .flat_map(|c| c.samples())
            .fold((0usize, 0usize), |(ok, total), s| (ok + s.is_success() as usize, total + 1));

        if total == 0 {
            0.0
        } else {
            ok as f64 / total as f64
        }
    }

    pub fn quality(&self) -> Quality {
        classify(self.path_status, self.all(), self.http_jitter, self.rate())
    }

    /// Number of probe cycles the statistics cover.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            timestamp: self.timestamp,
            path_status: self.path_status,
            quality: self.quality(),
            rate: self.rate(),
            cycles: self.window_len(),
            dns_jitter_ms: millis(self.dns_jitter),
            http_jitter_ms: millis(self.http_jitter),
            all: self.all().map(LatencySummary::from),
            dns: self.dns().map(LatencySummary::from),
            http: self.http().map(LatencySummary::from),
            dns_samples: self.dns_samples.iter().map(SampleSummary::from).collect(),
            http_samples: self.http_samples.iter().map(SampleSummary::from).collect(),
        }
    }
}

/// Serialisable snapshot of a [`Report`], durations in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub timestamp: DateTime<Utc>,
    pub path_status: PathStatus,
    pub quality: Quality,
    pub rate: f64,
    pub cycles: usize,
    pub dns_jitter_ms: f64,
    pub http_jitter_ms: f64,
    pub all: Option<LatencySummary>,
    pub dns: Option<LatencySummary>,
    pub http: Option<LatencySummary>,
    pub dns_samples: Vec<SampleSummary>,
    pub http_samples: Vec<SampleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub stddev_ms: f64,
}

impl From<LatencyStats> for LatencySummary {
    fn from(stats: LatencyStats) -> Self {
        Self {
            mean_ms: millis(stats.mean),
            stddev_ms: millis(stats.stddev),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub id: u64,
    pub protocol: Protocol,
    pub target: String,
    pub success: bool,
    pub latency_ms: Option<f64>,
}

impl From<&Sample> for SampleSummary {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id(),
            protocol: sample.protocol(),
            target: sample.target().to_string(),
            success: sample.is_success(),
            latency_ms: sample.latency().map(millis),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
