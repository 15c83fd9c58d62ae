// JSON REST surface. Thin translation layer: handlers validate input, call
// the store/planner/scheduler, and map error kinds to status codes.

mod dashboards;
mod results;
mod status;
mod targets;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::clock::Clock;
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreError};
use crate::version::{NAME, VERSION};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
}

pub fn app(store: Store, scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> Router {
    let state = AppState {
        store,
        scheduler,
        clock,
    };
    Router::new()
        .route("/version", get(version_handler))
        .route(
            "/api/targets",
            get(targets::list).post(targets::create),
        )
        .route(
            "/api/targets/{id}",
            get(targets::get_one)
                .put(targets::update)
                .delete(targets::delete),
        )
        .route("/api/results/{id}", get(results::get_results))
        .route("/api/status", get(status::get_status))
        .route(
            "/api/dashboards",
            get(dashboards::list).post(dashboards::create),
        )
        .route(
            "/api/dashboards/{id}",
            axum::routing::put(dashboards::update).delete(dashboards::delete),
        )
        .route(
            "/api/dashboards/{id}/graphs",
            get(dashboards::list_graphs).post(dashboards::create_graph),
        )
        .route(
            "/api/dashboards/{dashboard_id}/graphs/{graph_id}",
            axum::routing::put(dashboards::update_graph).delete(dashboards::delete_graph),
        )
        .route("/api/public/dashboards/{slug}", get(dashboards::get_public))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

pub(crate) fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::NotFound => error_response(StatusCode::NOT_FOUND, "not found"),
        StoreError::Conflict(msg) => error_response(StatusCode::CONFLICT, msg),
        other => {
            tracing::error!(error = %other, "storage failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
        }
    }
}
