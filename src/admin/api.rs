//! Operator-facing REST surface: inspect running lands, force-retire one,
//! read aggregate stats, and kick off a deterministic replay from a land's
//! recorded RNG seed.

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use crate::admin::auth::{AdminAuth, Role, authenticate, require};
use crate::api::error::JoinError;
use crate::realm::{LandRouter, LandSummary, Recording};

#[derive(Clone)]
pub struct AdminState {
    pub router: Arc<LandRouter>,
}

pub fn router(state: AdminState, auth: AdminAuth) -> axum::Router {
    axum::Router::new()
        .route("/admin/lands", get(list_lands))
        .route("/admin/lands/{land_type}/{instance_id}", get(get_land).delete(delete_land))
        .route("/admin/stats", get(stats))
        .route("/admin/reevaluation/replay/start", post(start_replay))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(auth, authenticate))
}

#[derive(Serialize)]
struct LandListResponse {
    lands: Vec<LandSummary>,
}

async fn list_lands(State(state): State<AdminState>, Extension(role): Extension<Role>) -> impl IntoResponse {
    if let Err(status) = require(Role::Viewer, Some(role)) {
        return status.into_response();
    }
    Json(LandListResponse {
        lands: state.router.list_lands(),
    })
    .into_response()
}

async fn get_land(
    State(state): State<AdminState>,
    Extension(role): Extension<Role>,
    Path((land_type, instance_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if let Err(status) = require(Role::Viewer, Some(role)) {
        return status.into_response();
    }
    let found = state
        .router
        .list_lands()
        .into_iter()
        .find(|land| land.land_type == land_type && land.instance_id == instance_id);
    match found {
        Some(land) => Json(land).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_land(
    State(state): State<AdminState>,
    Extension(role): Extension<Role>,
    Path((land_type, instance_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if let Err(status) = require(Role::Operator, Some(role)) {
        return status.into_response();
    }
    if state.router.force_retire_by_ids(&land_type, &instance_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[derive(Serialize)]
struct StatsResponse {
    total_lands: usize,
    total_members: usize,
}

async fn stats(State(state): State<AdminState>, Extension(role): Extension<Role>) -> impl IntoResponse {
    if let Err(status) = require(Role::Viewer, Some(role)) {
        return status.into_response();
    }
    let lands = state.router.list_lands();
    Json(StatsResponse {
        total_lands: lands.len(),
        total_members: lands.iter().map(|l| l.member_count).sum(),
    })
    .into_response()
}

#[derive(Deserialize)]
struct ReplayRequest {
    land_type: String,
    instance_id: String,
    recording: Recording,
}

#[derive(Serialize)]
struct ReplayErrorResponse {
    code: String,
    message: String,
}

fn replay_error_status(err: &JoinError) -> StatusCode {
    match err {
        JoinError::LandNotFound => StatusCode::NOT_FOUND,
        JoinError::Custom { .. } => StatusCode::CONFLICT,
        JoinError::RoomFull | JoinError::Unauthorized => StatusCode::BAD_REQUEST,
    }
}

/// Runs a deterministic replay of a recorded tick/action log against the
/// land type's `<landType>-replay` alias, seeded from the recording's own
/// [`crate::land::rng::ReplayHeader`]-derived seed, and reports the hash
/// stream the replay produced so a caller can diff it against the hashes
/// captured during the original live run.
async fn start_replay(
    State(state): State<AdminState>,
    Extension(role): Extension<Role>,
    axum::Json(body): axum::Json<ReplayRequest>,
) -> impl IntoResponse {
    if let Err(status) = require(Role::Admin, Some(role)) {
        return status.into_response();
    }
    match state.router.replay(&body.land_type, body.instance_id, body.recording).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => {
            let status = replay_error_status(&err);
            (
                status,
                Json(ReplayErrorResponse {
                    code: err.code().to_string(),
                    message: err.message(),
                }),
            )
                .into_response()
        }
    }
}
