//! # REST API
//!
//! Poll CRUD, voting, statistics and vote history. Every route except
//! `/health` and the `GET` reads requires a bearer token.

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use lib_polls::identity::bearer_credential;
use lib_polls::{NewPoll, PollPatch, PollSnapshot, PollSummary, Principal, Role, VoteError, VoteHistoryEntry};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::poll_logic::downstream;
use crate::poll_logic::error::ApiError;
use crate::poll_logic::model::{HealthResponse, MessageResponse, UpdateResponse, VoteRequest};
use crate::poll_logic::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/polls", post(create_poll).get(list_polls))
        .route("/api/polls/vote/{id}", post(cast_vote))
        .route("/api/polls/{id}", get(get_poll).put(update_poll).delete(delete_poll))
        .route("/api/polls/{id}/stats", get(poll_stats))
        .route("/api/auth/vote-history", get(vote_history))
        .route("/ws", get(downstream::ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// The verified caller of a request.
pub struct Caller(pub Principal);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = bearer_credential(header)?;
        let principal = state.identity.verify(token)?;
        Ok(Caller(principal))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(VoteError::InvalidInput(rejection.body_text())))
}

async fn create_poll(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<NewPoll>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(&[Role::Admin])?;
    let new_poll = body(payload)?;
    let snapshot = state.engine.create(new_poll, &caller.username).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn list_polls(State(state): State<AppState>) -> Result<Json<Vec<PollSnapshot>>, ApiError> {
    let polls = state.engine.list().await?;
    Ok(Json(polls.iter().map(|p| p.snapshot()).collect()))
}

async fn get_poll(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<PollSnapshot>, ApiError> {
    let poll = state.engine.get(&id).await?;
    Ok(Json(poll.snapshot()))
}

async fn update_poll(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    payload: Result<Json<PollPatch>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    caller.authorize(&[Role::Admin, Role::Moderator])?;
    let patch = body(payload)?;
    let poll = state.engine.update(&id, patch).await?;
    Ok(Json(UpdateResponse {
        message: "Poll updated.".to_string(),
        poll,
    }))
}

async fn delete_poll(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    caller.authorize(&[Role::Admin, Role::Moderator])?;
    state.engine.delete(&id).await?;
    Ok(Json(MessageResponse {
        message: "Poll deleted.".to_string(),
    }))
}

/// The vote runs on its own task, so a client that disconnects mid-request
/// cannot leave a half-finished vote behind.
async fn cast_vote(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<PollSnapshot>, ApiError> {
    caller.authorize(&[Role::User])?;
    let request = body(payload)?;
    let snapshot = state
        .engine
        .submit(id, caller.identity, request.option_index)
        .outcome()
        .await?;
    Ok(Json(snapshot))
}

async fn poll_stats(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<PollSummary>, ApiError> {
    Ok(Json(state.engine.summary(&id).await?))
}

async fn vote_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<VoteHistoryEntry>>, ApiError> {
    Ok(Json(state.engine.vote_history(&caller.identity).await?))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_closed() {
        "closing"
    } else if let Err(e) = state.engine.store().ping().await {
        warn!("Health check: store unreachable: {}", e);
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        store: state.engine.store().backend_name(),
        subscribers: state.hub.subscriber_count(),
        busy_polls: state.engine.busy_polls(),
        dropped_snapshots: state.hub.dropped_total(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
