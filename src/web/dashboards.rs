// Dashboards: named graph collections. A random slug minted at creation is
// the only credential for public read access.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{error_response, store_error_response, AppState};
use crate::models::{Dashboard, DashboardGraph};

#[derive(Debug, Deserialize)]
pub(super) struct DashboardPayload {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    target_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublicDashboard {
    dashboard: Dashboard,
    graphs: Vec<DashboardGraph>,
}

fn generate_slug() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub(super) async fn list(State(state): State<AppState>) -> Response {
    match state.store.list_dashboards().await {
        Ok(dashboards) => Json(dashboards).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn create(
    State(state): State<AppState>,
    Json(payload): Json<DashboardPayload>,
) -> Response {
    if payload.name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name is required");
    }
    let mut dashboard = Dashboard {
        id: 0,
        name: payload.name,
        slug: generate_slug(),
    };
    match state.store.add_dashboard(&mut dashboard).await {
        Ok(_) => (StatusCode::CREATED, Json(dashboard)).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<DashboardPayload>,
) -> Response {
    if payload.name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name is required");
    }
    let existing = match state.store.get_dashboard(id).await {
        Ok(d) => d,
        Err(e) => return store_error_response(e),
    };
    let dashboard = Dashboard {
        name: payload.name,
        ..existing
    };
    match state.store.update_dashboard(&dashboard).await {
        Ok(()) => Json(dashboard).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_dashboard(id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn list_graphs(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    if let Err(e) = state.store.get_dashboard(id).await {
        return store_error_response(e);
    }
    match state.store.list_graphs(id).await {
        Ok(graphs) => Json(graphs).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn create_graph(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<GraphPayload>,
) -> Response {
    if payload.title.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "title is required");
    }
    if let Err(e) = state.store.get_dashboard(id).await {
        return store_error_response(e);
    }

    let mut graph = DashboardGraph {
        id: 0,
        dashboard_id: id,
        title: payload.title,
        position: payload.position,
        target_ids: payload.target_ids,
    };
    if let Err(e) = state.store.add_graph(&mut graph).await {
        return store_error_response(e);
    }
    if !graph.target_ids.is_empty() {
        if let Err(e) = state.store.set_graph_targets(graph.id, &graph.target_ids).await {
            return store_error_response(e);
        }
    }
    (StatusCode::CREATED, Json(graph)).into_response()
}

pub(super) async fn update_graph(
    State(state): State<AppState>,
    Path((dashboard_id, graph_id)): Path<(i64, i64)>,
    Json(payload): Json<GraphPayload>,
) -> Response {
    if payload.title.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "title is required");
    }
    let graph = DashboardGraph {
        id: graph_id,
        dashboard_id,
        title: payload.title,
        position: payload.position,
        target_ids: payload.target_ids,
    };
    if let Err(e) = state.store.update_graph(&graph).await {
        return store_error_response(e);
    }
    if let Err(e) = state.store.set_graph_targets(graph_id, &graph.target_ids).await {
        return store_error_response(e);
    }
    Json(graph).into_response()
}

pub(super) async fn delete_graph(
    State(state): State<AppState>,
    Path((_dashboard_id, graph_id)): Path<(i64, i64)>,
) -> Response {
    match state.store.delete_graph(graph_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn get_public(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    let dashboard = match state.store.get_dashboard_by_slug(&slug).await {
        Ok(d) => d,
        Err(e) => return store_error_response(e),
    };
    let graphs = match state.store.list_graphs(dashboard.id).await {
        Ok(g) => g,
        Err(e) => return store_error_response(e),
    };
    Json(PublicDashboard { dashboard, graphs }).into_response()
}
