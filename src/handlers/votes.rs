use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::VoteSource;
use crate::error::AppError;
use crate::models::VoteUpdate;
use crate::reconciler::{ConnectionStatus, DEFAULT_ACTIVITY_MINUTES};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WatchRequest {
    pub submission_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct WatchResponse {
    pub submission_ids: Vec<String>,
    pub status: ConnectionStatus,
}

#[derive(Serialize)]
pub struct VotesResponse {
    pub updates: Vec<VoteUpdate>,
    pub status: ConnectionStatus,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub minutes: Option<i64>,
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub submission_id: String,
    pub recent: bool,
}

pub async fn watch_handler<S: VoteSource>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<WatchRequest>,
) -> Json<WatchResponse> {
    state.reconciler.watch(req.submission_ids).await;
    Json(WatchResponse {
        submission_ids: state.reconciler.watched_ids(),
        status: state.reconciler.status(),
    })
}

pub async fn unwatch_handler<S: VoteSource>(State(state): State<Arc<AppState<S>>>) -> StatusCode {
    state.reconciler.unwatch().await;
    StatusCode::NO_CONTENT
}

pub async fn list_handler<S: VoteSource>(State(state): State<Arc<AppState<S>>>) -> Json<VotesResponse> {
    Json(VotesResponse {
        updates: state.reconciler.snapshot(),
        status: state.reconciler.status(),
    })
}

pub async fn get_handler<S: VoteSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(submission_id): Path<String>,
) -> Result<Json<VoteUpdate>, AppError> {
    state
        .reconciler
        .get_vote_update(&submission_id)
        .map(Json)
        .ok_or(AppError::NotFound(submission_id))
}

// "Hot" submissions: a vote landed within the last few minutes
pub async fn activity_handler<S: VoteSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(submission_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Json<ActivityResponse> {
    let minutes = query.minutes.unwrap_or(DEFAULT_ACTIVITY_MINUTES);
    let recent = state.reconciler.has_recent_activity(&submission_id, minutes);
    Json(ActivityResponse {
        submission_id,
        recent,
    })
}
