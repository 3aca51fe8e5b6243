//! HTTP probe implementation.

use std::time::{Duration, Instant};
use super::ProbeError;

/// Run an HTTP GET probe against the given URL.
///
/// Succeeds on 204 or any 2xx status and returns the time to the response
/// headers.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let start = Instant::now();

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

    let elapsed = start.elapsed();
    let status = response.status();

    if !is_success_status(status.as_u16()) {
        return Err(ProbeError::Network(format!("unexpected status {}", status)));
    }

    Ok(elapsed)
}

fn is_success_status(code: u16) -> bool {
    code == 204 || (200..=299).contains(&code)
}
