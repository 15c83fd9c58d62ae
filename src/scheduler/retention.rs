// Retention manager: hourly (and once at startup) each tier of each target is
// trimmed to its own retention. Tiers are independent; the stats cache is kept
// honest by storage triggers, not here. VACUUM runs on its own schedule (cron
// expression or fixed interval) when configured.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::scheduler::rollup::target_policies;
use crate::store::Store;

/// How often retention is enforced.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// When to VACUUM. Default: never.
#[derive(Debug, Clone, Default)]
pub struct VacuumConfig {
    /// Cron expression, e.g. `"0 0 3 * * *"` for 03:00 UTC daily.
    pub schedule: Option<String>,
    /// Fixed interval, used when no cron expression is set.
    pub interval: Option<Duration>,
}

impl VacuumConfig {
    fn enabled(&self) -> bool {
        self.schedule.is_some() || self.interval.is_some()
    }
}

pub fn spawn_retention_manager(
    store: Store,
    clock: Arc<dyn Clock>,
    vacuum: VacuumConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
        if vacuum.enabled() {
            tokio::spawn(vacuum_scheduler(
                vacuum,
                clock.clone(),
                vacuum_tx,
                shutdown.clone(),
            ));
        }

        run_retention_pass(&store, clock.as_ref()).await;

        let mut tick = tokio::time::interval(RETENTION_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // consume the immediate first tick; startup pass already ran

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => run_retention_pass(&store, clock.as_ref()).await,
                _ = vacuum_rx.recv() => {
                    match store.vacuum().await {
                        Ok(()) => info!("vacuum complete"),
                        Err(e) => warn!(error = %e, "vacuum failed"),
                    }
                }
            }
        }
        debug!("retention manager stopped");
    })
}

/// Enforce every target's policies once. Failures are logged; the next tick
/// retries.
pub async fn run_retention_pass(store: &Store, clock: &dyn Clock) {
    let targets = match store.list_targets().await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "retention: failed to list targets");
            return;
        }
    };

    let now = clock.now();
    for target in targets {
        let Some(policies) = target_policies(&target) else {
            continue;
        };
        for policy in policies {
            let cutoff = now - ChronoDuration::seconds(policy.retention);
            let result = if policy.window == 0 {
                store.delete_raw_before(target.id, cutoff).await
            } else {
                store
                    .delete_aggregated_before(target.id, policy.window, cutoff)
                    .await
            };
            match result {
                Ok(0) => {}
                Ok(deleted) => debug!(
                    target = %target.name,
                    window = policy.window,
                    deleted,
                    "retention: trimmed tier"
                ),
                Err(e) => error!(
                    target = %target.name,
                    window = policy.window,
                    error = %e,
                    "retention: delete failed"
                ),
            }
        }
    }
}

/// Emits on `tx` whenever a VACUUM is due.
async fn vacuum_scheduler(
    config: VacuumConfig,
    clock: Arc<dyn Clock>,
    tx: tokio::sync::mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    if let Some(ref expr) = config.schedule {
        let Ok(schedule) = cron::Schedule::from_str(expr) else {
            warn!(cron = %expr, "invalid vacuum schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = clock.now();
            let Some(next) = schedule.after(&now).next() else {
                return;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if tx.send(()).await.is_err() {
                return;
            }
        }
    } else if let Some(interval) = config.interval {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if tx.send(()).await.is_err() {
                return;
            }
        }
    }
}
