// Startup configuration: environment variables with flag overrides.

use std::time::Duration;

use clap::Parser;

use crate::scheduler::retention::VacuumConfig;

pub const ENV_HTTP_PORT: &str = "VAPORTRAIL_HTTP_PORT";
pub const ENV_DB_PATH: &str = "VAPORTRAIL_DB_PATH";
pub const ENV_VACUUM_SCHEDULE: &str = "VAPORTRAIL_VACUUM_SCHEDULE";
pub const ENV_VACUUM_INTERVAL: &str = "VAPORTRAIL_VACUUM_INTERVAL_SECS";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "vaportrail.db";

#[derive(Debug, Parser)]
#[command(name = "vaportrail", version, about = "Network latency monitor")]
pub struct Cli {
    /// HTTP port (overrides VAPORTRAIL_HTTP_PORT).
    #[arg(long)]
    pub port: Option<u16>,
    /// SQLite database path (overrides VAPORTRAIL_DB_PATH).
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub db_path: String,
    pub vacuum: VacuumConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::resolve(Cli::parse(), |key| std::env::var(key).ok())
    }

    /// Merge flags over environment over defaults. Split out so tests can
    /// inject an environment.
    pub fn resolve(
        cli: Cli,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let http_port = match cli.port {
            Some(port) => port,
            None => match env(ENV_HTTP_PORT) {
                Some(raw) => raw
                    .parse::<u16>()
                    .map_err(|_| anyhow::anyhow!("{ENV_HTTP_PORT} must be a port, got {raw:?}"))?,
                None => DEFAULT_HTTP_PORT,
            },
        };
        anyhow::ensure!(http_port > 0, "http port must be between 1 and 65535");

        let db_path = cli
            .db
            .or_else(|| env(ENV_DB_PATH))
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        anyhow::ensure!(!db_path.is_empty(), "database path must be non-empty");

        let vacuum = VacuumConfig {
            schedule: env(ENV_VACUUM_SCHEDULE).filter(|s| !s.is_empty()),
            interval: match env(ENV_VACUUM_INTERVAL) {
                Some(raw) => {
                    let secs = raw.parse::<u64>().map_err(|_| {
                        anyhow::anyhow!("{ENV_VACUUM_INTERVAL} must be seconds, got {raw:?}")
                    })?;
                    Some(Duration::from_secs(secs))
                }
                None => None,
            },
        };

        Ok(Self {
            http_port,
            db_path,
            vacuum,
        })
    }
}
