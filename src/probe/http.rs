// HTTP probe: GET the URL and read the full body, so the measurement covers
// the whole transfer rather than just time-to-headers.

use std::time::{Duration, Instant};

use super::ProbeError;

pub(super) async fn run(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Transport(e.to_string()))?;

    let start = Instant::now();
    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Transport(e.to_string())
        }
    })?;

    let _ = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Transport(e.to_string())
        }
    })?;

    Ok(start.elapsed().as_nanos() as f64)
}
