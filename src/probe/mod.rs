// Probe contract and transport dispatch. A probe yields one latency in
// nanoseconds or a classified error; a timeout is never conflated with a
// transport failure, and a "success" measured at or past the deadline is
// reported as a timeout.

mod dns;
mod http;
mod ping;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProbeKind;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// What to probe. The address is interpreted per kind: a host for ping, a URL
/// (scheme optional) for http, a resolver host[:port] for dns.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub kind: ProbeKind,
    pub address: String,
}

#[async_trait]
pub trait ProbeRunner: Send + Sync + 'static {
    async fn run(&self, spec: &ProbeSpec, timeout: Duration) -> Result<f64, ProbeError>;
}

/// The real transports. Adds 0-100 ms of jitter before each probe so targets
/// created together don't fire in lockstep.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportRunner;

#[async_trait]
impl ProbeRunner for TransportRunner {
    async fn run(&self, spec: &ProbeSpec, timeout: Duration) -> Result<f64, ProbeError> {
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let latency = match spec.kind {
            ProbeKind::Ping => ping::run(&spec.address, timeout).await?,
            ProbeKind::Http => http::run(&spec.address, timeout).await?,
            ProbeKind::Dns => dns::run(&spec.address, timeout).await?,
        };

        if latency >= timeout.as_nanos() as f64 {
            return Err(ProbeError::Timeout(timeout));
        }
        Ok(latency)
    }
}
