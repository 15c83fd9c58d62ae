// Retention policies and the rollup manager. Every 10 s each target's tiers
// are extended window-by-window from their immediate finer tier (raw for the
// smallest). Tiers are processed in increasing window order inside one pass,
// so a coarser tier sees the finer rows written moments earlier.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::models::{AggregatedWindow, Target};
use crate::store::{LatencySketch, Store};

/// How often the rollup manager wakes up.
pub const ROLLUP_INTERVAL: Duration = Duration::from_secs(10);

/// Extra slack added to the probe timeout when computing the cutoff, covering
/// batch-writer latency for samples still in flight.
pub const CUTOFF_SLACK_SECS: f64 = 3.0;

/// One tier: `window` seconds per rollup window (0 = raw tier) kept for
/// `retention` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub window: i64,
    pub retention: i64,
}

/// The stock ladder applied to targets created without explicit policies.
pub fn default_policies() -> Vec<RetentionPolicy> {
    vec![
        RetentionPolicy { window: 0, retention: 604_800 }, // raw: 7 days
        RetentionPolicy { window: 60, retention: 15_768_000 }, // 1m: 6 months
        RetentionPolicy { window: 300, retention: 31_536_000 }, // 5m: 1 year
        RetentionPolicy { window: 3600, retention: 315_360_000 }, // 1h: 10 years
        RetentionPolicy { window: 86_400, retention: 3_153_600_000 }, // 1d: ~100 years
    ]
}

pub fn default_policies_json() -> String {
    serde_json::to_string(&default_policies()).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("retention window cannot be negative")]
    NegativeWindow,
    #[error("window {window} is not a multiple of smaller window {prev}")]
    NotMultiple { window: i64, prev: i64 },
}

/// Sort policies by window size and check the ladder: no negative windows,
/// and every non-raw window an integer multiple of its predecessor.
pub fn validate_policies(policies: &mut [RetentionPolicy]) -> Result<(), PolicyError> {
    policies.sort_by_key(|p| p.window);
    for (i, p) in policies.iter().enumerate() {
        if p.window < 0 {
            return Err(PolicyError::NegativeWindow);
        }
        if i > 0 {
            let prev = policies[i - 1].window;
            if prev > 0 && p.window % prev != 0 {
                return Err(PolicyError::NotMultiple {
                    window: p.window,
                    prev,
                });
            }
        }
    }
    Ok(())
}

/// A finer tier whose retention is shorter than its consumer's window will
/// leave that consumer with empty sources. Flagged, not rejected.
pub fn policy_warnings(policies: &[RetentionPolicy]) -> Vec<String> {
    let mut sorted = policies.to_vec();
    sorted.sort_by_key(|p| p.window);
    sorted
        .windows(2)
        .filter(|pair| pair[0].retention < pair[1].window)
        .map(|pair| {
            format!(
                "tier {}s retains only {}s, shorter than the {}s window built from it",
                pair[0].window, pair[0].retention, pair[1].window
            )
        })
        .collect()
}

/// Parse a target's policy JSON, sorted by window. None when the target has
/// no usable policies (empty, `[]`, or unparseable).
pub fn target_policies(target: &Target) -> Option<Vec<RetentionPolicy>> {
    if target.retention_policies.is_empty() || target.retention_policies == "[]" {
        return None;
    }
    let mut policies: Vec<RetentionPolicy> =
        serde_json::from_str(&target.retention_policies).ok()?;
    if policies.is_empty() {
        return None;
    }
    policies.sort_by_key(|p| p.window);
    Some(policies)
}

/// Align a timestamp down to the start of its window.
pub fn truncate_to_window(t: DateTime<Utc>, window_seconds: i64) -> DateTime<Utc> {
    let ts = t.timestamp();
    let aligned = ts - ts.rem_euclid(window_seconds);
    DateTime::from_timestamp(aligned, 0).unwrap_or(t)
}

pub fn spawn_rollup_manager(
    store: Store,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ROLLUP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => run_rollup_pass(&store, clock.as_ref()).await,
            }
        }
        debug!("rollup manager stopped");
    })
}

/// One full pass over every target and tier. Failures are logged per target;
/// the next tick retries from stored state.
pub async fn run_rollup_pass(store: &Store, clock: &dyn Clock) {
    let targets = match store.list_targets().await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "rollup: failed to list targets");
            return;
        }
    };

    for target in targets {
        let Some(policies) = target_policies(&target) else {
            continue;
        };
        let mut source_window = 0i64;
        for policy in policies {
            if policy.window == 0 {
                source_window = 0;
                continue;
            }
            extend_tier(store, clock, &target, policy.window, source_window).await;
            source_window = policy.window;
        }
    }
}

/// Walk one tier forward window-by-window until the cutoff, then commit the
/// new windows in a single transaction.
async fn extend_tier(
    store: &Store,
    clock: &dyn Clock,
    target: &Target,
    window_seconds: i64,
    source_window: i64,
) {
    let last = match store.last_rollup_time(target.id, window_seconds).await {
        Ok(last) => last,
        Err(e) => {
            error!(target = %target.name, window_seconds, error = %e, "rollup: last rollup time lookup failed");
            return;
        }
    };

    let mut next_start = match last {
        // `last` is the start of the newest stored window.
        Some(last) => last + ChronoDuration::seconds(window_seconds),
        None => match store.earliest_raw_time(target.id).await {
            Ok(Some(earliest)) => truncate_to_window(earliest, window_seconds),
            Ok(None) => return, // nothing recorded yet
            Err(e) => {
                error!(target = %target.name, error = %e, "rollup: earliest raw time lookup failed");
                return;
            }
        },
    };

    // Never close a window that may still receive in-flight samples.
    let slack = target.effective_timeout() + CUTOFF_SLACK_SECS;
    let cutoff = clock.now() - ChronoDuration::milliseconds((slack * 1000.0) as i64);

    let window_len = ChronoDuration::seconds(window_seconds);
    let mut batch: Vec<AggregatedWindow> = Vec::new();

    while next_start + window_len <= cutoff {
        let window_end = next_start + window_len;
        if let Some(window) =
            build_window(store, target, window_seconds, source_window, next_start, window_end).await
        {
            batch.push(window);
        }
        next_start = window_end;
    }

    if batch.is_empty() {
        return;
    }
    let produced = batch.len();
    match store.upsert_aggregated(&batch).await {
        Ok(()) => debug!(
            target = %target.name,
            window_seconds,
            produced,
            "rollup: tier extended"
        ),
        Err(e) => {
            error!(target = %target.name, window_seconds, error = %e, "rollup: batch save failed")
        }
    }
}

/// Aggregate one window from its sources. An empty source set still yields an
/// empty-sketch window so the tier keeps advancing instead of replaying
/// forever. Returns None only on fetch/encode failure (retried next tick).
async fn build_window(
    store: &Store,
    target: &Target,
    window_seconds: i64,
    source_window: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<AggregatedWindow> {
    let mut sketch = LatencySketch::empty();
    let mut timeout_count: i64 = 0;

    if source_window == 0 {
        let raws = match store.get_raw(target.id, start, end, -1).await {
            Ok(r) => r,
            Err(e) => {
                error!(target = %target.name, error = %e, "rollup: raw fetch failed");
                return None;
            }
        };
        let mut values = Vec::with_capacity(raws.len());
        for sample in &raws {
            if sample.is_timeout() {
                timeout_count += 1;
            } else {
                values.push(sample.latency_ns);
            }
        }
        sketch = LatencySketch::from_values(&values);
    } else {
        let sources = match store
            .get_aggregated(target.id, source_window, start, end)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(target = %target.name, source_window, error = %e, "rollup: source tier fetch failed");
                return None;
            }
        };
        for row in &sources {
            timeout_count += row.timeout_count;
            match LatencySketch::decode(&row.sketch) {
                Ok(sub) => sketch.merge(&sub),
                Err(e) => {
                    // Skip the bad source row; the window is still produced
                    // from the rest.
                    warn!(
                        target = %target.name,
                        source_window,
                        window_start = %row.start,
                        error = %e,
                        "rollup: skipping corrupt sketch"
                    );
                }
            }
        }
    }

    let data = match sketch.encode() {
        Ok(d) => d,
        Err(e) => {
            error!(target = %target.name, error = %e, "rollup: sketch encode failed");
            return None;
        }
    };

    Some(AggregatedWindow {
        start,
        target_id: target.id,
        window_seconds,
        sketch: data,
        timeout_count,
    })
}
