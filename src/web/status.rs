// GET /api/status: storage footprint and per-tier sketch accounting. Cheap by
// construction: PRAGMAs plus the trigger-maintained stats cache.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::{store_error_response, AppState};
use crate::models::{RawStats, SketchStat};
use crate::store::StoreError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusSnapshot {
    db_size_bytes: i64,
    page_count: i64,
    page_size: i64,
    freelist_count: i64,
    schema_version: i64,
    active_targets: usize,
    raw: RawStats,
    sketches: Vec<SketchStat>,
}

pub(super) async fn get_status(State(state): State<AppState>) -> Response {
    match build_snapshot(&state).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn build_snapshot(state: &AppState) -> Result<StatusSnapshot, StoreError> {
    Ok(StatusSnapshot {
        db_size_bytes: state.store.db_size_bytes().await?,
        page_count: state.store.page_count().await?,
        page_size: state.store.page_size().await?,
        freelist_count: state.store.freelist_count().await?,
        schema_version: state.store.schema_version().await?,
        active_targets: state.scheduler.active_count(),
        raw: state.store.raw_stats().await?,
        sketches: state.store.tdigest_stats().await?,
    })
}
