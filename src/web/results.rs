// GET /api/results/{id}: the planner's series for a time range, or the raw
// bypass when ?raw=true.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{error_response, store_error_response, AppState};
use crate::query::{query_raw, query_series, QueryRange};

#[derive(Debug, Deserialize)]
pub(super) struct ResultsParams {
    start: Option<String>,
    end: Option<String>,
    raw: Option<String>,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| format!("invalid time: {s}"))
}

pub(super) async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<ResultsParams>,
) -> Response {
    let target = match state.store.get_target(id).await {
        Ok(t) => t,
        Err(e) => return store_error_response(e),
    };

    let range = match (&params.start, &params.end) {
        (Some(start), Some(end)) => {
            let start = match parse_time(start) {
                Ok(t) => t,
                Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
            };
            let end = match parse_time(end) {
                Ok(t) => t,
                Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
            };
            QueryRange { start, end }
        }
        _ => QueryRange::last_hour(state.clock.as_ref()),
    };

    let result = if params.raw.as_deref() == Some("true") {
        query_raw(&state.store, &target, range).await
    } else {
        query_series(&state.store, &target, range).await
    };

    match result {
        Ok(points) => Json(points).into_response(),
        Err(e) => store_error_response(e),
    }
}
