// Domain models shared by the store, the probe pipeline, and the web API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency value recorded for a probe that hit its deadline.
pub const TIMEOUT_SENTINEL: f64 = -1.0;

/// Probe transport. Stored as lowercase text in the targets table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Http,
    Dns,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Http => "http",
            ProbeKind::Dns => "dns",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(ProbeKind::Ping),
            "http" => Ok(ProbeKind::Http),
            "dns" => Ok(ProbeKind::Dns),
            other => Err(format!("unknown probe type: {other}")),
        }
    }
}

/// A monitored target. `retention_policies` is a JSON array of
/// `{"window": secs, "retention": secs}` pairs, sorted by window size;
/// window 0 is the raw tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub address: String,
    pub probe_type: ProbeKind,
    #[serde(default)]
    pub probe_interval: f64,
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub retention_policies: String,
}

impl Target {
    /// Probe interval with the `<= 0 -> 1 s` default applied.
    pub fn effective_interval(&self) -> f64 {
        if self.probe_interval <= 0.0 {
            1.0
        } else {
            self.probe_interval
        }
    }

    /// Probe timeout with the `<= 0 -> 5 s` default applied.
    pub fn effective_timeout(&self) -> f64 {
        if self.timeout <= 0.0 { 5.0 } else { self.timeout }
    }
}

/// One probe outcome: a positive latency in nanoseconds, or the timeout
/// sentinel. The send timestamp is authoritative; arrival order is not.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub time: DateTime<Utc>,
    pub target_id: i64,
    pub latency_ns: f64,
}

impl RawSample {
    pub fn is_timeout(&self) -> bool {
        self.latency_ns == TIMEOUT_SENTINEL
    }
}

/// One rolled-up window. `start` is aligned to a multiple of
/// `window_seconds`; `sketch` is an encoded latency t-digest.
#[derive(Debug, Clone)]
pub struct AggregatedWindow {
    pub start: DateTime<Utc>,
    pub target_id: i64,
    pub window_seconds: i64,
    pub sketch: Vec<u8>,
    pub timeout_count: i64,
}

/// Raw-tier size report, served from the stats cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStats {
    pub count: i64,
    pub total_bytes: i64,
}

/// Per-target, per-tier sketch storage report, served from the stats cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SketchStat {
    pub target_id: i64,
    pub target_name: String,
    pub window_seconds: i64,
    pub count: i64,
    pub total_bytes: i64,
    pub avg_bytes: f64,
}

/// A named collection of graphs, publicly addressable by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

/// One graph on a dashboard, plotting a set of targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardGraph {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub dashboard_id: i64,
    pub title: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub target_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_kind_round_trips_through_str() {
        for kind in [ProbeKind::Ping, ProbeKind::Http, ProbeKind::Dns] {
            assert_eq!(kind.as_str().parse::<ProbeKind>().unwrap(), kind);
        }
        assert!("icmp".parse::<ProbeKind>().is_err());
    }

    #[test]
    fn target_defaults_apply_to_non_positive_values() {
        let t = Target {
            id: 1,
            name: "t".into(),
            address: "example.com".into(),
            probe_type: ProbeKind::Ping,
            probe_interval: 0.0,
            timeout: -3.0,
            retention_policies: String::new(),
        };
        assert_eq!(t.effective_interval(), 1.0);
        assert_eq!(t.effective_timeout(), 5.0);
    }

    #[test]
    fn timeout_sentinel_is_detected() {
        let s = RawSample {
            time: Utc::now(),
            target_id: 1,
            latency_ns: TIMEOUT_SENTINEL,
        };
        assert!(s.is_timeout());
        let ok = RawSample {
            latency_ns: 12_000_000.0,
            ..s
        };
        assert!(!ok.is_timeout());
    }
}
