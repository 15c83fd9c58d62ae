// Store contract tests: CRUD, batch atomicity, upsert semantics, range
// queries, cascading deletes, and the trigger-maintained stats cache.

mod common;

use chrono::Duration;
use common::*;
use vaportrail::models::{AggregatedWindow, Dashboard, ProbeKind};
use vaportrail::store::{LatencySketch, Store, StoreError};

#[tokio::test]
async fn target_crud_round_trip() {
    let (store, _dir) = temp_store().await;

    let mut target = make_target("crud", "[]");
    target.probe_interval = 0.0; // defaults kick in
    target.timeout = 0.0;
    let id = store.add_target(&mut target).await.unwrap();
    assert!(id > 0);
    assert_eq!(target.probe_interval, 1.0);
    assert_eq!(target.timeout, 5.0);

    let fetched = store.get_target(id).await.unwrap();
    assert_eq!(fetched.name, "crud");
    assert_eq!(fetched.probe_type, ProbeKind::Ping);
    assert_eq!(fetched.probe_interval, 1.0);

    let mut updated = fetched.clone();
    updated.name = "renamed".to_string();
    updated.probe_type = ProbeKind::Http;
    store.update_target(&updated).await.unwrap();
    let fetched = store.get_target(id).await.unwrap();
    assert_eq!(fetched.name, "renamed");
    assert_eq!(fetched.probe_type, ProbeKind::Http);

    let listed = store.list_targets().await.unwrap();
    assert_eq!(listed.len(), 1);

    store.delete_target(id).await.unwrap();
    assert!(matches!(
        store.get_target(id).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn missing_target_operations_return_not_found() {
    let (store, _dir) = temp_store().await;
    assert!(matches!(
        store.get_target(999).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        store.delete_target(999).await,
        Err(StoreError::NotFound)
    ));
    let mut ghost = make_target("ghost", "[]");
    ghost.id = 999;
    assert!(matches!(
        store.update_target(&ghost).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn raw_samples_ordered_and_range_bounded() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "raw", "[]").await;
    let start = t0();

    // Inserted out of timestamp order; reads come back ascending.
    let batch = vec![
        sample(target.id, start + Duration::seconds(2), 300.0),
        sample(target.id, start, 100.0),
        sample(target.id, start + Duration::seconds(1), 200.0),
        sample(target.id, start + Duration::seconds(3), 400.0),
    ];
    store.append_raw(&batch).await.unwrap();

    let all = store
        .get_raw(target.id, start, start + Duration::seconds(10), -1)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    let latencies: Vec<f64> = all.iter().map(|s| s.latency_ns).collect();
    assert_eq!(latencies, vec![100.0, 200.0, 300.0, 400.0]);

    // End bound is exclusive.
    let bounded = store
        .get_raw(target.id, start, start + Duration::seconds(3), -1)
        .await
        .unwrap();
    assert_eq!(bounded.len(), 3);

    let limited = store
        .get_raw(target.id, start, start + Duration::seconds(10), 2)
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].latency_ns, 100.0);
}

#[tokio::test]
async fn earliest_raw_time_tracks_minimum() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "earliest", "[]").await;

    assert!(store.earliest_raw_time(target.id).await.unwrap().is_none());

    let start = t0();
    store
        .append_raw(&[
            sample(target.id, start + Duration::seconds(30), 1.0),
            sample(target.id, start, 1.0),
        ])
        .await
        .unwrap();
    assert_eq!(
        store.earliest_raw_time(target.id).await.unwrap(),
        Some(start)
    );
}

#[tokio::test]
async fn upsert_replaces_existing_window() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "upsert", "[]").await;
    let start = t0();

    let first = AggregatedWindow {
        start,
        target_id: target.id,
        window_seconds: 60,
        sketch: LatencySketch::from_values(&[100.0]).encode().unwrap(),
        timeout_count: 1,
    };
    store.upsert_aggregated(&[first]).await.unwrap();

    let second = AggregatedWindow {
        start,
        target_id: target.id,
        window_seconds: 60,
        sketch: LatencySketch::from_values(&[1.0, 2.0, 3.0]).encode().unwrap(),
        timeout_count: 7,
    };
    store.upsert_aggregated(&[second]).await.unwrap();

    let rows = store
        .get_aggregated(target.id, 60, start, start + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timeout_count, 7);
    assert_eq!(sketch_count(&rows[0]), 3.0);
}

#[tokio::test]
async fn last_rollup_time_is_tier_maximum() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "last", "[]").await;
    let start = t0();

    assert!(store.last_rollup_time(target.id, 60).await.unwrap().is_none());

    store
        .upsert_aggregated(&[
            empty_window(target.id, 60, start),
            empty_window(target.id, 60, start + Duration::seconds(60)),
            empty_window(target.id, 300, start + Duration::seconds(600)),
        ])
        .await
        .unwrap();

    assert_eq!(
        store.last_rollup_time(target.id, 60).await.unwrap(),
        Some(start + Duration::seconds(60))
    );
    // Tiers are independent.
    assert_eq!(
        store.last_rollup_time(target.id, 300).await.unwrap(),
        Some(start + Duration::seconds(600))
    );
}

#[tokio::test]
async fn deletes_trim_by_cutoff_and_tier() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "trim", "[]").await;
    let start = t0();

    store
        .append_raw(&[
            sample(target.id, start, 1.0),
            sample(target.id, start + Duration::seconds(60), 2.0),
        ])
        .await
        .unwrap();
    let deleted = store
        .delete_raw_before(target.id, start + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    store
        .upsert_aggregated(&[
            empty_window(target.id, 60, start),
            empty_window(target.id, 60, start + Duration::seconds(60)),
            empty_window(target.id, 300, start),
        ])
        .await
        .unwrap();

    let deleted = store
        .delete_aggregated_before(target.id, 60, start + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    // The 300 s tier was untouched.
    assert_eq!(
        store
            .get_aggregated(target.id, 300, start, start + Duration::seconds(600))
            .await
            .unwrap()
            .len(),
        1
    );

    let dropped = store.delete_aggregated_by_window(target.id, 300).await.unwrap();
    assert_eq!(dropped, 1);
}

#[tokio::test]
async fn delete_target_cascades() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "cascade", "[]").await;
    let start = t0();

    store
        .append_raw(&[sample(target.id, start, 1.0)])
        .await
        .unwrap();
    store
        .upsert_aggregated(&[empty_window(target.id, 60, start)])
        .await
        .unwrap();

    store.delete_target(target.id).await.unwrap();

    let raws = store
        .get_raw(target.id, start, start + Duration::seconds(60), -1)
        .await
        .unwrap();
    assert!(raws.is_empty());
    let aggs = store
        .get_aggregated(target.id, 60, start, start + Duration::seconds(60))
        .await
        .unwrap();
    assert!(aggs.is_empty());
    // Cascade flows through the stats triggers too.
    assert_eq!(store.raw_stats().await.unwrap().count, 0);
    assert!(store.tdigest_stats().await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_cache_tracks_raw_and_sketch_rows() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "stats", "[]").await;
    let start = t0();

    let batch: Vec<_> = (0..10)
        .map(|i| sample(target.id, start + Duration::seconds(i), 5.0))
        .collect();
    store.append_raw(&batch).await.unwrap();

    let raw = store.raw_stats().await.unwrap();
    assert_eq!(raw.count, 10);
    assert_eq!(raw.total_bytes, 400);

    let small = LatencySketch::from_values(&[1.0]).encode().unwrap();
    let big = LatencySketch::from_values(&(1..=200).map(f64::from).collect::<Vec<_>>())
        .encode()
        .unwrap();
    store
        .upsert_aggregated(&[AggregatedWindow {
            start,
            target_id: target.id,
            window_seconds: 60,
            sketch: small.clone(),
            timeout_count: 0,
        }])
        .await
        .unwrap();

    let stats = store.tdigest_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].target_id, target.id);
    assert_eq!(stats[0].target_name, "stats");
    assert_eq!(stats[0].window_seconds, 60);
    assert_eq!(stats[0].count, 1);
    assert_eq!(stats[0].total_bytes, small.len() as i64);

    // Overwriting the same window adjusts bytes without changing row count.
    store
        .upsert_aggregated(&[AggregatedWindow {
            start,
            target_id: target.id,
            window_seconds: 60,
            sketch: big.clone(),
            timeout_count: 0,
        }])
        .await
        .unwrap();
    let stats = store.tdigest_stats().await.unwrap();
    assert_eq!(stats[0].count, 1);
    assert_eq!(stats[0].total_bytes, big.len() as i64);

    // Deletes drain the counters back down.
    store
        .delete_raw_before(target.id, start + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(store.raw_stats().await.unwrap().count, 5);
    store.delete_aggregated_by_window(target.id, 60).await.unwrap();
    assert!(store.tdigest_stats().await.unwrap().is_empty());
}

#[tokio::test]
async fn size_pragmas_report_positive_numbers() {
    let (store, _dir) = temp_store().await;
    assert!(store.page_size().await.unwrap() > 0);
    assert!(store.page_count().await.unwrap() > 0);
    assert!(store.db_size_bytes().await.unwrap() > 0);
    assert!(store.freelist_count().await.unwrap() >= 0);
    assert!(store.schema_version().await.unwrap() >= 2);
}

#[tokio::test]
async fn reconnect_is_idempotent_and_keeps_data() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vaportrail.db");
    let path = path.to_str().unwrap();

    let store = Store::connect(path).await.unwrap();
    let target = seeded_target(&store, "persist", "[]").await;
    drop(store);

    // Second connect re-runs migration bookkeeping without error.
    let store = Store::connect(path).await.unwrap();
    let fetched = store.get_target(target.id).await.unwrap();
    assert_eq!(fetched.name, "persist");
}

#[tokio::test]
async fn duplicate_dashboard_slug_is_a_conflict() {
    let (store, _dir) = temp_store().await;
    let mut first = Dashboard {
        id: 0,
        name: "a".into(),
        slug: "fixed-slug".into(),
    };
    store.add_dashboard(&mut first).await.unwrap();

    let mut second = Dashboard {
        id: 0,
        name: "b".into(),
        slug: "fixed-slug".into(),
    };
    assert!(matches!(
        store.add_dashboard(&mut second).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn dashboard_graphs_round_trip() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "graphed", "[]").await;

    let mut dashboard = Dashboard {
        id: 0,
        name: "ops".into(),
        slug: "cafe0123cafe0123".into(),
    };
    store.add_dashboard(&mut dashboard).await.unwrap();

    let mut graph = vaportrail::models::DashboardGraph {
        id: 0,
        dashboard_id: dashboard.id,
        title: "latency".into(),
        position: 1,
        target_ids: vec![],
    };
    store.add_graph(&mut graph).await.unwrap();
    store
        .set_graph_targets(graph.id, &[target.id])
        .await
        .unwrap();

    let graphs = store.list_graphs(dashboard.id).await.unwrap();
    assert_eq!(graphs.len(), 1);
    assert_eq!(graphs[0].title, "latency");
    assert_eq!(graphs[0].target_ids, vec![target.id]);

    let by_slug = store.get_dashboard_by_slug("cafe0123cafe0123").await.unwrap();
    assert_eq!(by_slug.id, dashboard.id);

    store.delete_dashboard(dashboard.id).await.unwrap();
    assert!(matches!(
        store.get_dashboard(dashboard.id).await,
        Err(StoreError::NotFound)
    ));
}
