//! REST surface for the matchmaking control plane: ticket lifecycle for
//! game clients, heartbeat/deregister for game servers, and a JWKS-style
//! key endpoint so a server can verify match tokens independently.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};

use crate::api::error::MatchmakingError;
use crate::matchmaking::provisioning::{ProvisioningRegistry, ServerRegistration};
use crate::matchmaking::store::{StoreError, TicketStore};
use crate::matchmaking::ticket::{Ticket, TicketStatus};

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
    retryable: bool,
}

fn error_response(err: MatchmakingError) -> impl IntoResponse {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        success: false,
        error: ErrorDetail {
            code: err.code(),
            message: err.message(),
            retryable: err.retryable(),
        },
    };
    (status, Json(body)).into_response()
}

#[derive(Clone)]
pub struct MatchmakingState {
    pub store: Arc<dyn TicketStore>,
    pub provisioning: Arc<ProvisioningRegistry>,
    pub public_key_pem: Arc<str>,
}

pub fn router(state: MatchmakingState) -> axum::Router {
    axum::Router::new()
        .route("/matchmaking/tickets", post(enqueue))
        .route("/matchmaking/tickets/{ticket_id}", get(status).delete(cancel))
        .route("/matchmaking/servers/register", post(register_server))
        .route("/matchmaking/servers/{server_id}", delete(deregister))
        .route("/matchmaking/jwks", get(jwks))
        .with_state(state)
}

#[derive(Deserialize)]
struct EnqueueRequest {
    members: Vec<u64>,
    queue_key: String,
    group_id: Option<String>,
    group_size: Option<u32>,
    region: Option<String>,
}

#[derive(Serialize)]
struct EnqueueResponse {
    ticket: Ticket,
}

async fn enqueue(
    State(state): State<MatchmakingState>,
    Json(body): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let ticket = Ticket {
        ticket_id: uuid::Uuid::new_v4().to_string(),
        group_id: body.group_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        queue_key: body.queue_key,
        group_size: body.group_size.unwrap_or(body.members.len() as u32).max(1),
        members: body.members,
        region: body.region,
        status: TicketStatus::Queued,
        created_at_unix_ms: unix_millis(),
        assignment: None,
    };
    match state.store.enqueue(ticket.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(EnqueueResponse { ticket })).into_response(),
        Err(StoreError::DuplicateGroup) => error_response(MatchmakingError::DuplicateGroup).into_response(),
        Err(_) => error_response(MatchmakingError::NoCapacity).into_response(),
    }
}

async fn status(State(state): State<MatchmakingState>, Path(ticket_id): Path<String>) -> impl IntoResponse {
    match state.store.get(&ticket_id).await {
        Some(ticket) => Json(ticket).into_response(),
        None => error_response(MatchmakingError::TicketNotFound).into_response(),
    }
}

async fn cancel(State(state): State<MatchmakingState>, Path(ticket_id): Path<String>) -> impl IntoResponse {
    match state.store.cancel(&ticket_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => error_response(MatchmakingError::TicketNotFound).into_response(),
    }
}

/// Body for `POST /matchmaking/servers/register`: idempotent register-or-
/// heartbeat, keyed by `server_id`.
#[derive(Deserialize)]
struct RegisterRequest {
    server_id: String,
    land_type: String,
    host: String,
    port: u16,
    connect_host: Option<String>,
    connect_port: Option<u16>,
    connect_scheme: Option<String>,
    capacity: u32,
    lands_hosted: u32,
}

async fn register_server(
    State(state): State<MatchmakingState>,
    Json(body): Json<RegisterRequest>,
) -> impl IntoResponse {
    state.provisioning.heartbeat(ServerRegistration {
        server_id: &body.server_id,
        land_type: &body.land_type,
        host: &body.host,
        port: body.port,
        connect_host: body.connect_host.as_deref(),
        connect_port: body.connect_port,
        connect_scheme: body.connect_scheme.as_deref(),
        capacity: body.capacity,
        lands_hosted: body.lands_hosted,
    });
    StatusCode::NO_CONTENT
}

async fn deregister(State(state): State<MatchmakingState>, Path(server_id): Path<String>) -> impl IntoResponse {
    state.provisioning.deregister(&server_id);
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct JwksResponse {
    public_key_pem: Arc<str>,
}

async fn jwks(State(state): State<MatchmakingState>) -> impl IntoResponse {
    Json(JwksResponse {
        public_key_pem: state.public_key_pem,
    })
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
