use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::feed::ChangeEvent;
use crate::metrics::WEBHOOK_DELIVERIES;
use crate::state::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// Database webhook: row changes pushed by the backend
pub async fn db_webhook_handler<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if let Some(secret) = &state.webhook_secret {
        let given = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            warn!("rejected webhook delivery with a bad secret");
            return Err(AppError::Unauthorized);
        }
    }

    let event: ChangeEvent =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;
    WEBHOOK_DELIVERIES.inc();

    let table = event.table.clone();
    let delivered = state.hub.publish(event);
    debug!(%table, delivered, "webhook change published");

    Ok(StatusCode::ACCEPTED)
}
