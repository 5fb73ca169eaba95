use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;

use crate::fingerprint::{ClientInfo, client_fingerprint};
use crate::rate_limit::{AttemptOutcome, RateLimitStatus};
use crate::state::AppState;

#[derive(Serialize)]
pub struct FingerprintResponse {
    pub identifier: String,
}

pub async fn fingerprint_handler(Json(info): Json<ClientInfo>) -> Json<FingerprintResponse> {
    Json(FingerprintResponse {
        identifier: client_fingerprint(&info),
    })
}

// Checked by the sign-in form before it calls the auth API
pub async fn status_handler<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(identifier): Path<String>,
) -> Json<RateLimitStatus> {
    Json(state.rate_limiter.get_status(&identifier))
}

pub async fn failure_handler<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(identifier): Path<String>,
) -> (StatusCode, Json<AttemptOutcome>) {
    let outcome = state.rate_limiter.record_failed_attempt(&identifier);
    let status = if outcome.blocked {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::OK
    };
    (status, Json(outcome))
}

pub async fn success_handler<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(identifier): Path<String>,
) -> StatusCode {
    state.rate_limiter.record_successful_attempt(&identifier);
    StatusCode::NO_CONTENT
}
