// Query planner: tier selection against stored data, series resolution,
// raw bypass, and output sanitization.

mod common;

use chrono::Duration;
use common::*;
use vaportrail::clock::ManualClock;
use vaportrail::models::AggregatedWindow;
use vaportrail::query::{
    query_raw, query_series, select_window, QueryRange, FALLBACK_WINDOW, MAX_POINTS,
    PERCENTILE_GRID_STEPS,
};
use vaportrail::store::LatencySketch;

const LADDER: &str = r#"[
    {"window":0,"retention":604800},
    {"window":60,"retention":15768000},
    {"window":300,"retention":31536000},
    {"window":3600,"retention":315360000}
]"#;

#[test]
fn planner_selection_follows_the_spec_table() {
    let available = [60, 300, 3600];
    // 600 s / 1000 -> desired 1 -> smallest tier.
    assert_eq!(select_window(&available, 600.0), 60);
    // 1,200,000 s -> desired 1200 -> nothing is coarse enough -> largest.
    assert_eq!(select_window(&available, 1_200_000.0), 3600);
    // No tiers at all -> 60.
    assert_eq!(select_window(&[], 600.0), FALLBACK_WINDOW);
}

#[tokio::test]
async fn series_uses_the_chosen_tier() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "tiered", LADDER).await;
    let start = t0();

    // Populate the 60 s tier and a decoy 300 s tier.
    let mut windows = Vec::new();
    for i in 0..10i64 {
        windows.push(AggregatedWindow {
            start: start + Duration::seconds(i * 60),
            target_id: target.id,
            window_seconds: 60,
            sketch: LatencySketch::from_values(&[(i + 1) as f64 * 1e6; 5])
                .encode()
                .unwrap(),
            timeout_count: i,
        });
    }
    windows.push(empty_window(target.id, 300, start));
    store.upsert_aggregated(&windows).await.unwrap();

    // Ten minutes -> desired window 1 -> tier 60.
    let range = QueryRange {
        start,
        end: start + Duration::seconds(600),
    };
    let points = query_series(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), 10);
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point.window_seconds, 60);
        assert_eq!(point.probe_count, 5);
        assert_eq!(point.timeout_count, i as i64);
        let expected = (i + 1) as f64 * 1e6;
        assert_eq!(point.p50, expected);
        assert_eq!(point.avg_ns, expected as i64);
        assert_eq!(point.min_ns, expected as i64);
        assert_eq!(point.max_ns, expected as i64);
        assert_eq!(point.percentiles.len(), PERCENTILE_GRID_STEPS);
    }
}

#[tokio::test]
async fn empty_sketch_rows_resolve_to_zeros() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "empty", LADDER).await;
    let start = t0();

    store
        .upsert_aggregated(&[AggregatedWindow {
            timeout_count: 12,
            ..empty_window(target.id, 60, start)
        }])
        .await
        .unwrap();

    let range = QueryRange {
        start,
        end: start + Duration::seconds(600),
    };
    let points = query_series(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), 1);
    let point = &points[0];
    assert_eq!(point.probe_count, 0);
    assert_eq!(point.timeout_count, 12);
    assert_eq!(point.p50, 0.0);
    assert_eq!(point.avg_ns, 0);
    assert!(point.percentiles.iter().all(|p| p.is_finite()));
    assert!(point.percentiles.iter().all(|p| *p == 0.0));
}

#[tokio::test]
async fn undecodable_sketch_rows_resolve_to_zeros() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "garbage", LADDER).await;
    let start = t0();

    store
        .upsert_aggregated(&[AggregatedWindow {
            start,
            target_id: target.id,
            window_seconds: 60,
            sketch: vec![0xff, 0x00, 0x12],
            timeout_count: 3,
        }])
        .await
        .unwrap();

    let range = QueryRange {
        start,
        end: start + Duration::seconds(600),
    };
    let points = query_series(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].probe_count, 0);
    assert_eq!(points[0].timeout_count, 3);
    assert!(points[0].percentiles.iter().all(|p| p.is_finite()));
}

#[tokio::test]
async fn raw_mode_returns_first_thousand_ascending() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "raw", LADDER).await;
    let start = t0();

    let batch: Vec<_> = (0..MAX_POINTS + 5)
        .map(|i| sample(target.id, start + Duration::seconds(i), (i + 1) as f64))
        .collect();
    store.append_raw(&batch).await.unwrap();

    let range = QueryRange {
        start,
        end: start + Duration::seconds(MAX_POINTS + 100),
    };
    let points = query_raw(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), MAX_POINTS as usize);
    assert_eq!(points[0].p50, 1.0);
    assert_eq!(points.last().unwrap().p50, MAX_POINTS as f64);
    for point in &points {
        assert_eq!(point.probe_count, 1);
        assert_eq!(point.window_seconds, 0);
        assert_eq!(point.p0, point.p100);
        assert_eq!(point.percentiles.len(), PERCENTILE_GRID_STEPS);
        assert!(point.percentiles.iter().all(|p| *p == point.p50));
    }
}

#[tokio::test]
async fn raw_mode_flags_timeout_samples() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "raw-timeouts", LADDER).await;
    let start = t0();

    store
        .append_raw(&[
            sample(target.id, start, 100.0),
            timeout_sample(target.id, start + Duration::seconds(1)),
        ])
        .await
        .unwrap();

    let range = QueryRange {
        start,
        end: start + Duration::seconds(10),
    };
    let points = query_raw(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timeout_count, 0);
    assert_eq!(points[1].timeout_count, 1);
}

#[tokio::test]
async fn default_range_is_the_last_hour() {
    let clock = ManualClock::new(t0());
    let range = QueryRange::last_hour(&clock);
    assert_eq!(range.end, t0());
    assert_eq!(range.end - range.start, Duration::hours(1));
}

#[tokio::test]
async fn target_without_tiers_falls_back_to_sixty() {
    let (store, _dir) = temp_store().await;
    let target = seeded_target(&store, "bare", "[]").await;
    let start = t0();

    // A row in the fallback tier is found even with no policies configured.
    store
        .upsert_aggregated(&[empty_window(target.id, FALLBACK_WINDOW, start)])
        .await
        .unwrap();

    let range = QueryRange {
        start,
        end: start + Duration::seconds(600),
    };
    let points = query_series(&store, &target, range).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].window_seconds, FALLBACK_WINDOW);
}
