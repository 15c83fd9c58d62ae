// Batch writer: the single consumer of the raw-sample channel. Buffers until
// 500 rows or 2 s, whichever first, then commits the batch in one
// transaction. A failed flush drops the buffer; samples are not critical
// enough to risk backing the whole pipeline up behind a sick disk.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::RawSample;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub max_batch: usize,
    pub flush_interval: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_batch: 500,
            flush_interval: Duration::from_secs(2),
        }
    }
}

pub fn spawn_batch_writer(
    mut rx: mpsc::Receiver<RawSample>,
    store: Store,
    config: BatchWriterConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<RawSample> = Vec::with_capacity(config.max_batch);
        let mut tick = tokio::time::interval(config.flush_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    flush(&store, &mut buffer).await;
                    break;
                }
                received = rx.recv() => {
                    match received {
                        Some(sample) => {
                            buffer.push(sample);
                            if buffer.len() >= config.max_batch {
                                flush(&store, &mut buffer).await;
                            }
                        }
                        None => {
                            // All senders gone; flush what's left and exit.
                            flush(&store, &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = tick.tick() => flush(&store, &mut buffer).await,
            }
        }
        debug!("batch writer stopped");
    })
}

async fn flush(store: &Store, buffer: &mut Vec<RawSample>) {
    if buffer.is_empty() {
        return;
    }
    let rows = buffer.len();
    if let Err(e) = store.append_raw(buffer).await {
        warn!(rows, error = %e, "raw sample flush failed; dropping batch");
    } else {
        debug!(rows, "flushed raw samples");
    }
    buffer.clear();
}
