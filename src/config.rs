//! Configuration module for netgauge.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default time between probe cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default scheduling slack added to each tick after the first.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5);

/// Default number of probe cycles kept for rolling statistics.
pub const DEFAULT_WINDOW: usize = 10;

/// Public DNS resolvers used for UDP reachability.
pub const DEFAULT_UDP_TARGETS: &[&str] = &["1.1.1.1", "8.8.8.8"];

/// Well-known connectivity-check endpoints.
pub const DEFAULT_HTTP_TARGETS: &[&str] = &[
    "http://connectivitycheck.gstatic.com/generate_204",
    "http://cp.cloudflare.com/generate_204",
    "http://captive.apple.com/hotspot-detect.html",
];

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("window must hold at least one probe cycle")]
    EmptyWindow,
    #[error("interval must be greater than zero")]
    ZeroInterval,
    #[error("no probe targets configured")]
    NoTargets,
}

/// Monitoring session configuration, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between probe cycles (default: 30s)
    pub interval: Duration,
    /// Maximum random delay added to each tick after the first (default: 5s)
    pub tolerance: Duration,
    /// Hosts probed over UDP on port 53
    pub udp_targets: Vec<String>,
    /// URLs probed with HTTP GET
    pub http_targets: Vec<String>,
    /// Number of probe cycles kept (default: 10)
    pub window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tolerance: DEFAULT_TOLERANCE,
            udp_targets: DEFAULT_UDP_TARGETS.iter().map(|s| s.to_string()).collect(),
            http_targets: DEFAULT_HTTP_TARGETS.iter().map(|s| s.to_string()).collect(),
            window: DEFAULT_WINDOW,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETGAUGE_INTERVAL_SECS`: seconds between probe cycles (default: 30)
    /// - `NETGAUGE_TOLERANCE_SECS`: scheduling slack in seconds (default: 5)
    /// - `NETGAUGE_WINDOW`: probe cycles kept for statistics (default: 10)
    /// - `NETGAUGE_UDP_TARGETS`: comma-separated hosts
    /// - `NETGAUGE_HTTP_TARGETS`: comma-separated URLs
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(interval) = env_secs("NETGAUGE_INTERVAL_SECS") {
            if !interval.is_zero() {
                cfg.interval = interval;
            }
        }

        if let Some(tolerance) = env_secs("NETGAUGE_TOLERANCE_SECS") {
            cfg.tolerance = tolerance;
        }

        if let Some(window) = env_parse::<usize>("NETGAUGE_WINDOW") {
            cfg.window = window;
        }

        if let Ok(list) = env::var("NETGAUGE_UDP_TARGETS") {
            cfg.udp_targets = parse_list(&list);
        }

        if let Ok(list) = env::var("NETGAUGE_HTTP_TARGETS") {
            cfg.http_targets = parse_list(&list);
        }

        cfg.dedup_targets();
        cfg
    }

    /// Check that the configuration can drive a monitoring session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.udp_targets.is_empty() && self.http_targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(())
    }

    /// Collapse repeated targets, keeping the first occurrence.
    pub fn dedup_targets(&mut self) {
        dedup_in_order(&mut self.udp_targets);
        dedup_in_order(&mut self.http_targets);
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETGAUGE_HTTP_PORT`: HTTP port (default: 8080)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("NETGAUGE_HTTP_PORT") {
            cfg.http_port = port;
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Seconds as a `Duration`. Negative, non-finite and out-of-range values are ignored.
fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
