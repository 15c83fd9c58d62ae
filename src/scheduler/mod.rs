// Probe scheduler: one loop per active target, a bounded shared channel into
// the batch writer, and keyed cancellation handles behind a mutex that is only
// ever held for map mutation.

pub mod retention;
pub mod rollup;
pub mod writer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{RawSample, Target, TIMEOUT_SENTINEL};
use crate::probe::{ProbeError, ProbeRunner, ProbeSpec};
use crate::store::{Store, StoreError};

/// Capacity of the shared raw-sample channel.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 1000;

/// Maximum in-flight probes per target; ticks beyond this are skipped.
pub const PROBE_CONCURRENCY_CAP: usize = 5;

pub struct Scheduler {
    store: Store,
    runner: Arc<dyn ProbeRunner>,
    clock: Arc<dyn Clock>,
    sample_tx: mpsc::Sender<RawSample>,
    loops: Mutex<HashMap<i64, CancellationToken>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        runner: Arc<dyn ProbeRunner>,
        clock: Arc<dyn Clock>,
        sample_tx: mpsc::Sender<RawSample>,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
            sample_tx,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Start probing every stored target.
    pub async fn start(&self) -> Result<(), StoreError> {
        let targets = self.store.list_targets().await?;
        info!(targets = targets.len(), "starting scheduler");
        for target in targets {
            self.add_target(target);
        }
        Ok(())
    }

    /// Begin probing a target. Idempotent: a target already running is left
    /// alone.
    pub fn add_target(&self, target: Target) {
        let cancel = {
            let mut loops = self.loops.lock().unwrap();
            if loops.contains_key(&target.id) {
                return;
            }
            let cancel = CancellationToken::new();
            loops.insert(target.id, cancel.clone());
            cancel
        };

        info!(target = %target.name, id = target.id, "scheduler: adding target");
        let runner = self.runner.clone();
        let clock = self.clock.clone();
        let tx = self.sample_tx.clone();
        tokio::spawn(run_probe_loop(target, runner, clock, tx, cancel));
    }

    /// Stop probing a target. The loop drains its in-flight probes (bounded
    /// by the probe timeout) before exiting; the shared channel stays open.
    pub fn remove_target(&self, id: i64) {
        let cancel = self.loops.lock().unwrap().remove(&id);
        if let Some(cancel) = cancel {
            cancel.cancel();
            info!(id, "scheduler: removed target");
        }
    }

    pub fn is_active(&self, id: i64) -> bool {
        self.loops.lock().unwrap().contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.loops.lock().unwrap().len()
    }

    /// Cancel every probe loop (process shutdown).
    pub fn shutdown(&self) {
        let mut loops = self.loops.lock().unwrap();
        for (_, cancel) in loops.drain() {
            cancel.cancel();
        }
    }
}

async fn run_probe_loop(
    target: Target,
    runner: Arc<dyn ProbeRunner>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<RawSample>,
    cancel: CancellationToken,
) {
    let timeout = Duration::from_secs_f64(target.effective_timeout());
    let spec = ProbeSpec {
        kind: target.probe_type,
        address: target.address.clone(),
    };
    let semaphore = Arc::new(Semaphore::new(PROBE_CONCURRENCY_CAP));

    let mut tick = tokio::time::interval(Duration::from_secs_f64(target.effective_interval()));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut saturation_logged = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => {
                        saturation_logged = false;
                        permit
                    }
                    Err(_) => {
                        if !saturation_logged {
                            warn!(
                                target = %target.name,
                                cap = PROBE_CONCURRENCY_CAP,
                                "skipping probe tick, concurrency cap reached"
                            );
                            saturation_logged = true;
                        }
                        continue;
                    }
                };

                let runner = runner.clone();
                let clock = clock.clone();
                let tx = tx.clone();
                let spec = spec.clone();
                let name = target.name.clone();
                let target_id = target.id;

                tokio::spawn(async move {
                    let _permit = permit;
                    let sent = clock.now();
                    let latency_ns = match runner.run(&spec, timeout).await {
                        Ok(ns) => ns,
                        Err(ProbeError::Timeout(_)) => TIMEOUT_SENTINEL,
                        Err(ProbeError::Transport(e)) => {
                            // No record for transport failures.
                            debug!(target = %name, error = %e, "probe failed");
                            return;
                        }
                    };
                    let sample = RawSample {
                        time: sent,
                        target_id,
                        latency_ns,
                    };
                    if tx.send(sample).await.is_err() {
                        debug!(target = %name, "sample channel closed");
                    }
                });
            }
        }
    }

    // Drain in-flight probes before the loop goes away: once all permits are
    // reacquired nothing is still running. Bounded so a wedged transport
    // can't hold removal hostage.
    let drain = timeout + Duration::from_secs(1);
    if tokio::time::timeout(drain, semaphore.acquire_many(PROBE_CONCURRENCY_CAP as u32))
        .await
        .is_err()
    {
        warn!(target = %target.name, "in-flight probes did not settle before removal");
    }
    debug!(target = %target.name, "probe loop stopped");
}
