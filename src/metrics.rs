use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, register_counter, register_counter_vec, register_gauge,
};


lazy_static! {
    pub static ref AUTH_FAILURES: Counter =
        register_counter!("plyaz_auth_failures_total", "Failed sign-in attempts recorded").unwrap();
    pub static ref AUTH_BLOCKS: Counter =
        register_counter!("plyaz_auth_blocks_total", "Clients blocked after too many failures").unwrap();
    pub static ref AUTH_RESETS: Counter =
        register_counter!("plyaz_auth_resets_total", "Attempt histories cleared by a successful sign-in").unwrap();
    pub static ref LIMITER_ENTRIES: Gauge =
        register_gauge!("plyaz_rate_limit_entries", "Clients currently tracked by the rate limiter").unwrap();
    pub static ref CHANGE_EVENTS: CounterVec = register_counter_vec!(
        "plyaz_change_events_total",
        "Change events seen by the vote reconciler",
        &["table", "outcome"]
    )
    .unwrap();
    pub static ref FETCH_FAILURES: Counter =
        register_counter!("plyaz_aggregate_fetch_failures_total", "Failed vote aggregate fetches").unwrap();
    pub static ref WEBHOOK_DELIVERIES: Counter =
        register_counter!("plyaz_webhook_deliveries_total", "Database webhook deliveries accepted").unwrap();
    pub static ref WATCHED_SUBMISSIONS: Gauge =
        register_gauge!("plyaz_watched_submissions", "Submissions the reconciler is watching").unwrap();
}
