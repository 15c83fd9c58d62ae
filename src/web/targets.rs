// Target CRUD. Create/update validate the payload, normalize retention
// policies (parse, validate, sort, re-serialize), and keep the scheduler in
// step with the stored state.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use super::{error_response, store_error_response, AppState};
use crate::models::{ProbeKind, Target};
use crate::scheduler::rollup::{
    default_policies_json, policy_warnings, target_policies, validate_policies, RetentionPolicy,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TargetPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    probe_type: String,
    #[serde(default)]
    probe_interval: f64,
    #[serde(default)]
    timeout: f64,
    #[serde(default)]
    retention_policies: String,
}

impl TargetPayload {
    /// Validate and normalize into a Target. Errors are user-facing strings.
    fn into_target(self, id: i64) -> Result<Target, String> {
        if self.name.is_empty() || self.address.is_empty() || self.probe_type.is_empty() {
            return Err("missing required fields: name, address, probeType".into());
        }
        let probe_type: ProbeKind = self.probe_type.parse()?;

        let retention_policies = if self.retention_policies.is_empty()
            || self.retention_policies == "[]"
        {
            default_policies_json()
        } else {
            let mut policies: Vec<RetentionPolicy> =
                serde_json::from_str(&self.retention_policies)
                    .map_err(|_| "invalid retention policies JSON".to_string())?;
            validate_policies(&mut policies).map_err(|e| e.to_string())?;
            for warning in policy_warnings(&policies) {
                warn!(target = %self.name, warning = %warning, "retention policy will gap");
            }
            serde_json::to_string(&policies)
                .map_err(|_| "invalid retention policies JSON".to_string())?
        };

        Ok(Target {
            id,
            name: self.name,
            address: self.address,
            probe_type,
            probe_interval: self.probe_interval,
            timeout: self.timeout,
            retention_policies,
        })
    }
}

pub(super) async fn list(State(state): State<AppState>) -> Response {
    match state.store.list_targets().await {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_target(id).await {
        Ok(target) => Json(target).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub(super) async fn create(
    State(state): State<AppState>,
    Json(payload): Json<TargetPayload>,
) -> Response {
    let mut target = match payload.into_target(0) {
        Ok(t) => t,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    if let Err(e) = state.store.add_target(&mut target).await {
        return store_error_response(e);
    }
    state.scheduler.add_target(target.clone());

    (StatusCode::CREATED, Json(target)).into_response()
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TargetPayload>,
) -> Response {
    let existing = match state.store.get_target(id).await {
        Ok(t) => t,
        Err(e) => return store_error_response(e),
    };

    let target = match payload.into_target(id) {
        Ok(t) => t,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    // Tiers dropped from the policy set lose their stored windows.
    let kept: HashSet<i64> = target_policies(&target)
        .unwrap_or_default()
        .iter()
        .map(|p| p.window)
        .collect();
    for old in target_policies(&existing).unwrap_or_default() {
        if old.window > 0 && !kept.contains(&old.window) {
            if let Err(e) = state
                .store
                .delete_aggregated_by_window(id, old.window)
                .await
            {
                warn!(id, window = old.window, error = %e, "failed to drop removed tier");
            }
        }
    }

    if let Err(e) = state.store.update_target(&target).await {
        return store_error_response(e);
    }

    // Restart the probe loop with the new settings.
    state.scheduler.remove_target(id);
    state.scheduler.add_target(target.clone());

    Json(target).into_response()
}

pub(super) async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    if let Err(e) = state.store.delete_target(id).await {
        return store_error_response(e);
    }
    state.scheduler.remove_target(id);
    StatusCode::OK.into_response()
}
