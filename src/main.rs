use clap::Parser; // for cli
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plyaz_gateway::{
    backend::RestClient,
    clock::{Clock, SystemClock},
    config::Args,
    feed::ChangeHub,
    handlers::router,
    rate_limit::{RateLimiter, sweeper},
    reconciler::VoteReconciler,
    state::AppState,
};

// this is main async function with tokio
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse cli arguments
    let args = Args::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit_config(), clock.clone()));
    let hub = ChangeHub::new(args.hub_capacity);
    let source = RestClient::new(reqwest::Client::new(), &args.backend_url, &args.backend_key);
    let reconciler = Arc::new(VoteReconciler::new(source, hub.clone(), clock));

    // creating shared state
    let state = Arc::new(AppState {
        rate_limiter: rate_limiter.clone(),
        reconciler: reconciler.clone(),
        hub,
        webhook_secret: args.webhook_secret.clone(),
    });

    // spawn the background sweeper
    let sweep_every = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        sweeper(rate_limiter, sweep_every).await;
    });

    let watched = args.watched_ids();
    if !watched.is_empty() {
        reconciler.watch(watched).await;
    }

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!("Gateway running on http://localhost:{}", args.port);
    info!("Reading vote aggregates from {}", args.backend_url);
    info!(
        "Rate limit: {} failed sign-ins per {} minutes, blocked for {} minutes",
        args.max_attempts, args.window_mins, args.block_mins
    );
    if args.webhook_secret.is_none() {
        info!("Webhook secret not set, /hooks/db accepts any caller");
    }

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
