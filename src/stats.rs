//! Latency and jitter statistics over probe durations.

use std::time::Duration;

/// Mean and population standard deviation of a set of latencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: Duration,
    pub stddev: Duration,
}

/// Compute jitter as the mean absolute difference between successive durations.
///
/// `durations` must be in acquisition order. The summed differences are divided
/// by the number of samples, so `[30ms, 40ms, 35ms]` yields `(10 + 5) / 3 = 5ms`.
/// Fewer than two samples have no jitter.
pub fn jitter(durations: &[Duration]) -> Duration {
    if durations.len() < 2 {
        return Duration::ZERO;
    }

    let total: f64 = durations
        .windows(2)
        .map(|pair| (pair[1].as_secs_f64() - pair[0].as_secs_f64()).abs())
        .sum();

    Duration::from_secs_f64(total / durations.len() as f64)
}

/// Compute mean and population standard deviation.
///
/// Returns `None` for an empty input.
pub fn latency(durations: &[Duration]) -> Option<LatencyStats> {
    if durations.is_empty() {
        return None;
    }

    let n = durations.len() as f64;
    let secs: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
    let mean = secs.iter().sum::<f64>() / n;
    let variance = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

    Some(LatencyStats {
        mean: Duration::from_secs_f64(mean),
        stddev: Duration::from_secs_f64(variance.sqrt()),
    })
}
