// Query planner: picks the coarsest tier that still gives the caller enough
// points, then resolves the series by decoding each window's sketch once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::clock::Clock;
use crate::models::Target;
use crate::scheduler::rollup::target_policies;
use crate::store::{LatencySketch, Store, StoreError};

/// Point budget for one query response.
pub const MAX_POINTS: i64 = 1000;

/// Tier used when a target has no non-raw policies at all.
pub const FALLBACK_WINDOW: i64 = 60;

/// Number of entries in the uniform percentile grid (0.00, 0.05, ..., 1.00).
pub const PERCENTILE_GRID_STEPS: usize = 21;

/// One resolved point. Field names are the wire schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeriesPoint {
    pub time: DateTime<Utc>,
    #[serde(rename = "TargetID")]
    pub target_id: i64,
    #[serde(rename = "MinNS")]
    pub min_ns: i64,
    #[serde(rename = "MaxNS")]
    pub max_ns: i64,
    #[serde(rename = "AvgNS")]
    pub avg_ns: i64,
    pub p0: f64,
    pub p1: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p99: f64,
    pub p100: f64,
    pub percentiles: Vec<f64>,
    pub timeout_count: i64,
    pub probe_count: i64,
    pub window_seconds: i64,
}

/// Time range `[start, end)` plus the raw-bypass flag.
#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryRange {
    /// Default range: the hour ending now.
    pub fn last_hour(clock: &dyn Clock) -> Self {
        let end = clock.now();
        Self {
            start: end - chrono::Duration::hours(1),
            end,
        }
    }

    fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Pick the smallest available window that keeps the response under the point
/// budget; the largest available when none is coarse enough; 60 when the
/// target has no aggregated tiers at all. `available` must be sorted
/// ascending.
pub fn select_window(available: &[i64], duration_secs: f64) -> i64 {
    let desired = ((duration_secs / MAX_POINTS as f64) as i64).max(1);
    for &window in available {
        if window >= desired {
            return window;
        }
    }
    available.last().copied().unwrap_or(FALLBACK_WINDOW)
}

/// Resolve an aggregated series for the range.
pub async fn query_series(
    store: &Store,
    target: &Target,
    range: QueryRange,
) -> Result<Vec<SeriesPoint>, StoreError> {
    let windows: Vec<i64> = target_policies(target)
        .unwrap_or_default()
        .iter()
        .map(|p| p.window)
        .filter(|w| *w > 0)
        .collect();
    let window_seconds = select_window(&windows, range.duration_secs());

    let rows = store
        .get_aggregated(target.id, window_seconds, range.start, range.end)
        .await?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let sketch = match LatencySketch::decode(&row.sketch) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    target_id = target.id,
                    window_seconds,
                    window_start = %row.start,
                    error = %e,
                    "query: undecodable sketch, serving zeros"
                );
                LatencySketch::empty()
            }
        };

        let quantile = |q: f64| sanitize(sketch.quantile(q).unwrap_or(0.0));
        let p0 = quantile(0.0);
        let p100 = quantile(1.0);
        let percentiles = (0..PERCENTILE_GRID_STEPS)
            .map(|i| quantile(i as f64 * 0.05))
            .collect();

        points.push(SeriesPoint {
            time: row.start,
            target_id: row.target_id,
            min_ns: p0 as i64,
            max_ns: p100 as i64,
            avg_ns: sanitize(sketch.mean()) as i64,
            p0,
            p1: quantile(0.01),
            p25: quantile(0.25),
            p50: quantile(0.5),
            p75: quantile(0.75),
            p99: quantile(0.99),
            p100,
            percentiles,
            timeout_count: row.timeout_count,
            probe_count: sketch.count() as i64,
            window_seconds: row.window_seconds,
        });
    }
    Ok(points)
}

/// Raw bypass: the first `MAX_POINTS` samples ascending, each mapped to a
/// single-probe point whose percentiles all equal the sample latency.
pub async fn query_raw(
    store: &Store,
    target: &Target,
    range: QueryRange,
) -> Result<Vec<SeriesPoint>, StoreError> {
    let samples = store
        .get_raw(target.id, range.start, range.end, MAX_POINTS)
        .await?;

    Ok(samples
        .into_iter()
        .map(|sample| {
            let v = sanitize(sample.latency_ns);
            SeriesPoint {
                time: sample.time,
                target_id: sample.target_id,
                min_ns: v as i64,
                max_ns: v as i64,
                avg_ns: v as i64,
                p0: v,
                p1: v,
                p25: v,
                p50: v,
                p75: v,
                p99: v,
                p100: v,
                percentiles: vec![v; PERCENTILE_GRID_STEPS],
                timeout_count: i64::from(sample.is_timeout()),
                probe_count: 1,
                window_seconds: 0,
            }
        })
        .collect())
}

/// Degenerate sketches can emit NaN or infinities; the wire never does.
fn sanitize(v: f64) -> f64 {
    if v.is_nan() || v.is_infinite() { 0.0 } else { v }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_window_prefers_smallest_adequate() {
        let available = [60, 300, 3600];
        // 600 s / 1000 -> desired 1; smallest >= 1 is 60.
        assert_eq!(select_window(&available, 600.0), 60);
        // 400_000 s -> desired 400; smallest >= 400 is 3600.
        assert_eq!(select_window(&available, 400_000.0), 3600);
        // 120_000 s -> desired 120; 300 fits.
        assert_eq!(select_window(&available, 120_000.0), 300);
    }

    #[test]
    fn select_window_falls_back_to_largest() {
        // desired 1200 exceeds everything; take the largest.
        assert_eq!(select_window(&[60, 300, 3600], 1_200_000.0), 3600);
    }

    #[test]
    fn select_window_defaults_when_no_tiers() {
        assert_eq!(select_window(&[], 600.0), FALLBACK_WINDOW);
    }

    #[test]
    fn select_window_floor_of_one() {
        // Tiny ranges still ask for a 1 s window, not 0.
        assert_eq!(select_window(&[60], 0.5), 60);
    }

    #[test]
    fn sanitize_replaces_non_finite() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), 0.0);
        assert_eq!(sanitize(42.5), 42.5);
    }
}
