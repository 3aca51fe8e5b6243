//! netgauge - Internet connectivity quality monitor.
//!
//! Combines a network-path observer with periodic UDP and HTTP probes and
//! publishes rolling latency, jitter, success-rate and quality reports.

pub mod config;
pub mod monitor;
pub mod path;
pub mod probe;
pub mod report;
pub mod stats;
pub mod web;
pub mod window;

pub use config::{ConfigError, MonitorConfig, ServerConfig};
pub use monitor::{Broker, Monitor, MonitorError, Subscription};
pub use path::{PathObserver, PathStatus, RouteObserver};
pub use probe::{NetProber, ProbeCycleResult, ProbeError, Prober, Protocol, Sample};
pub use report::{Quality, Report, ReportSummary};
pub use stats::LatencyStats;
pub use window::SlidingWindow;

/// Monitor wired to the real network.
pub type NetMonitor = Monitor<NetProber, RouteObserver>;
