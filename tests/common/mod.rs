// Shared test helpers: temp stores, fixture targets, and mock probe runners.
#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use vaportrail::models::{AggregatedWindow, ProbeKind, RawSample, Target, TIMEOUT_SENTINEL};
use vaportrail::probe::{ProbeError, ProbeRunner, ProbeSpec};
use vaportrail::store::{LatencySketch, Store};

/// Fresh store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_store() -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vaportrail.db");
    let store = Store::connect(path.to_str().unwrap()).await.unwrap();
    (store, dir)
}

/// A fixed, minute-aligned reference instant.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn make_target(name: &str, policies_json: &str) -> Target {
    Target {
        id: 0,
        name: name.to_string(),
        address: "probe.test".to_string(),
        probe_type: ProbeKind::Ping,
        probe_interval: 1.0,
        timeout: 1.0,
        retention_policies: policies_json.to_string(),
    }
}

pub async fn seeded_target(store: &Store, name: &str, policies_json: &str) -> Target {
    let mut target = make_target(name, policies_json);
    store.add_target(&mut target).await.unwrap();
    target
}

pub fn sample(target_id: i64, time: DateTime<Utc>, latency_ns: f64) -> RawSample {
    RawSample {
        time,
        target_id,
        latency_ns,
    }
}

pub fn timeout_sample(target_id: i64, time: DateTime<Utc>) -> RawSample {
    sample(target_id, time, TIMEOUT_SENTINEL)
}

/// An aggregated row with an empty sketch, for pre-seeding rollup state.
pub fn empty_window(target_id: i64, window_seconds: i64, start: DateTime<Utc>) -> AggregatedWindow {
    AggregatedWindow {
        start,
        target_id,
        window_seconds,
        sketch: LatencySketch::empty().encode().unwrap(),
        timeout_count: 0,
    }
}

pub fn decode_sketch(window: &AggregatedWindow) -> LatencySketch {
    LatencySketch::decode(&window.sketch).unwrap()
}

pub fn median(window: &AggregatedWindow) -> f64 {
    decode_sketch(window).quantile(0.5).expect("empty sketch")
}

pub fn sketch_count(window: &AggregatedWindow) -> f64 {
    decode_sketch(window).count()
}

// --- Mock probe runners ---

/// Always succeeds with a fixed latency.
pub struct FixedRunner(pub f64);

#[async_trait]
impl ProbeRunner for FixedRunner {
    async fn run(&self, _spec: &ProbeSpec, _timeout: Duration) -> Result<f64, ProbeError> {
        Ok(self.0)
    }
}

/// Always times out.
pub struct TimeoutRunner;

#[async_trait]
impl ProbeRunner for TimeoutRunner {
    async fn run(&self, _spec: &ProbeSpec, timeout: Duration) -> Result<f64, ProbeError> {
        Err(ProbeError::Timeout(timeout))
    }
}

/// Always fails with a transport error.
pub struct FailRunner;

#[async_trait]
impl ProbeRunner for FailRunner {
    async fn run(&self, _spec: &ProbeSpec, _timeout: Duration) -> Result<f64, ProbeError> {
        Err(ProbeError::Transport("mock transport down".into()))
    }
}

/// Blocks every probe until released, tracking in-flight concurrency.
pub struct BlockingRunner {
    pub current: Arc<AtomicI64>,
    pub max_seen: Arc<AtomicI64>,
    release: tokio::sync::watch::Receiver<bool>,
}

impl BlockingRunner {
    pub fn new() -> (Self, tokio::sync::watch::Sender<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (
            Self {
                current: Arc::new(AtomicI64::new(0)),
                max_seen: Arc::new(AtomicI64::new(0)),
                release: rx,
            },
            tx,
        )
    }
}

#[async_trait]
impl ProbeRunner for BlockingRunner {
    async fn run(&self, _spec: &ProbeSpec, _timeout: Duration) -> Result<f64, ProbeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);

        let mut release = self.release.clone();
        while !*release.borrow() {
            if release.changed().await.is_err() {
                break;
            }
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(1_000_000.0)
    }
}
