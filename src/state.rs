use std::sync::Arc;

use crate::backend::RestClient;
use crate::feed::ChangeHub;
use crate::rate_limit::RateLimiter;
use crate::reconciler::VoteReconciler;

// app's shared state
pub struct AppState<S = RestClient> {
    pub rate_limiter: Arc<RateLimiter>,
    pub reconciler: Arc<VoteReconciler<S, ChangeHub>>,
    pub hub: ChangeHub, // webhook deliveries are published here
    pub webhook_secret: Option<String>,
}
