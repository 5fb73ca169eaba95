mod auth;
mod health;
mod hooks;
mod metrics;
mod votes;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::backend::VoteSource;
use crate::state::AppState;

pub use auth::{failure_handler, fingerprint_handler, status_handler, success_handler};
pub use health::health_handler;
pub use hooks::{WEBHOOK_SECRET_HEADER, db_webhook_handler};
pub use metrics::metrics_handler;
pub use votes::{activity_handler, get_handler, list_handler, unwatch_handler, watch_handler};

pub fn router<S: VoteSource>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/auth/fingerprint", post(fingerprint_handler))
        .route("/auth/limits/{identifier}", get(status_handler::<S>))
        .route("/auth/limits/{identifier}/failure", post(failure_handler::<S>))
        .route("/auth/limits/{identifier}/success", post(success_handler::<S>))
        .route("/votes", get(list_handler::<S>))
        .route(
            "/votes/watch",
            put(watch_handler::<S>).delete(unwatch_handler::<S>),
        )
        .route("/votes/{submission_id}", get(get_handler::<S>))
        .route("/votes/{submission_id}/activity", get(activity_handler::<S>))
        .route("/hooks/db", post(db_webhook_handler::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SourceError;
    use crate::clock::{Clock, ManualClock};
    use crate::feed::ChangeHub;
    use crate::models::SubmissionSummary;
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::reconciler::VoteReconciler;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::Response,
    };
    use chrono::DateTime;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    // Every submission has the same counters; nobody has a name
    struct FixedSource;

    impl VoteSource for FixedSource {
        async fn fetch_summaries(&self, ids: &[String]) -> Result<Vec<SubmissionSummary>, SourceError> {
            Ok(ids
                .iter()
                .map(|id| SubmissionSummary {
                    id: id.clone(),
                    total_votes: 10,
                    votes_for: 7,
                    votes_against: 3,
                })
                .collect())
        }

        async fn fetch_voter_name(&self, _voter_id: &str) -> Result<Option<String>, SourceError> {
            Ok(None)
        }
    }

    fn app(webhook_secret: Option<&str>) -> (Router, Arc<AppState<FixedSource>>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_760_000_000, 0).unwrap(),
        ));
        let hub = ChangeHub::new(16);
        let state = Arc::new(AppState {
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone())),
            reconciler: Arc::new(VoteReconciler::new(FixedSource, hub.clone(), clock)),
            hub,
            webhook_secret: webhook_secret.map(str::to_string),
        });
        (router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (app, _) = app(None);
        let res = send(&app, "GET", "/health", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "healthy");
    }

    #[tokio::test]
    async fn fingerprint_returns_client_key() {
        let (app, _) = app(None);
        let res = send(
            &app,
            "POST",
            "/auth/fingerprint",
            Some(json!({ "hostname": "plyaz.io", "user_agent": "test", "language": "en",
                         "screen_width": 390, "screen_height": 844 })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let identifier = json_body(res).await["identifier"].as_str().unwrap().to_string();
        assert!(identifier.starts_with("client_"));
    }

    #[tokio::test]
    async fn failures_lead_to_429_and_success_clears() {
        let (app, _) = app(None);
        for _ in 0..4 {
            let res = send(&app, "POST", "/auth/limits/client_42/failure", None).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = send(&app, "POST", "/auth/limits/client_42/failure", None).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(res).await;
        assert_eq!(body["blocked"], true);
        assert_eq!(body["block_duration_minutes"], 30);

        let res = send(&app, "GET", "/auth/limits/client_42", None).await;
        let body = json_body(res).await;
        assert_eq!(body["blocked"], true);
        assert_eq!(body["minutes_until_unblock"], 30);

        let res = send(&app, "POST", "/auth/limits/client_42/success", None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let body = json_body(send(&app, "GET", "/auth/limits/client_42", None).await).await;
        assert_eq!(body["attempts"], 0);
        assert_eq!(body["remaining_attempts"], 5);
    }

    #[tokio::test]
    async fn watch_then_read_votes() {
        let (app, _) = app(None);
        let res = send(&app, "PUT", "/votes/watch", Some(json!({ "submission_ids": ["S1"] }))).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["submission_ids"], json!(["S1"]));
        assert_eq!(body["status"]["is_connected"], true);

        let body = json_body(send(&app, "GET", "/votes/S1", None).await).await;
        assert_eq!(body["approval_percentage"], 70.0);

        let res = send(&app, "GET", "/votes/S9", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let body = json_body(send(&app, "GET", "/votes/S1/activity?minutes=5", None).await).await;
        assert_eq!(body["recent"], false);

        let res = send(&app, "DELETE", "/votes/watch", None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let body = json_body(send(&app, "GET", "/votes", None).await).await;
        assert_eq!(body["updates"], json!([]));
    }

    #[tokio::test]
    async fn webhook_feeds_the_reconciler() {
        let (app, state) = app(Some("s3cret"));
        send(&app, "PUT", "/votes/watch", Some(json!({ "submission_ids": ["S1"] }))).await;

        let push = json!({
            "type": "UPDATE",
            "table": "submissions",
            "schema": "public",
            "record": { "id": "S1", "total_votes": 4, "votes_for": 1, "votes_against": 3 },
            "old_record": null
        });

        let res = send(&app, "POST", "/hooks/db", Some(push.clone())).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/hooks/db")
            .header(WEBHOOK_SECRET_HEADER, "s3cret")
            .body(Body::from(push.to_string()))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        for _ in 0..200 {
            if state.reconciler.get_vote_update("S1").is_some_and(|u| u.total_votes == 4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state.reconciler.get_vote_update("S1").unwrap().approval_percentage, 25.0);
    }

    #[tokio::test]
    async fn malformed_webhook_is_rejected() {
        let (app, _) = app(None);
        let res = send(&app, "POST", "/hooks/db", Some(json!({ "table": "votes" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
