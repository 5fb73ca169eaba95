use chrono::TimeDelta;
use clap::Parser;

use crate::rate_limit::RateLimitConfig;

// One year; longer windows or blocks make no sense for a sign-in form
const MAX_POLICY_MINS: i64 = 525_600;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "plyaz-gateway")]
#[command(about = "Sign-in throttling and live vote tallies for the Plyaz web client")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Base url of the managed backend (row API lives under /rest/v1)
    #[arg(short, long, default_value = "http://localhost:54321")]
    pub backend_url: String,

    // Backend api key, sent as `apikey` and bearer token
    #[arg(long, env = "PLYAZ_BACKEND_KEY", default_value = "", hide_env_values = true)]
    pub backend_key: String,

    // Shared secret the database webhook must send in `x-webhook-secret`
    #[arg(long, env = "PLYAZ_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    // Failed sign-ins allowed before a client is blocked
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    // Window in minutes over which failed sign-ins are counted
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(i64).range(0..=MAX_POLICY_MINS))]
    pub window_mins: i64,

    // How long a blocked client stays blocked, in minutes
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(0..=MAX_POLICY_MINS))]
    pub block_mins: i64,

    // Seconds between sweeps of expired rate limit entries
    #[arg(long, default_value_t = 60)]
    pub sweep_interval: u64,

    // Submissions to watch at startup (comma-separated ids)
    #[arg(short, long, default_value = "")]
    pub watch: String,

    // Events the change hub buffers per subscriber before it lags
    #[arg(long, default_value_t = 256)]
    pub hub_capacity: usize,
}

impl Args {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_attempts: self.max_attempts.max(1),
            window: TimeDelta::minutes(self.window_mins),
            block_duration: TimeDelta::minutes(self.block_mins),
        }
    }

    pub fn watched_ids(&self) -> Vec<String> {
        self.watch
            .split(',')
            .map(|s| s.trim()) // remove spaces
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
