use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::metrics::{AUTH_BLOCKS, AUTH_FAILURES, AUTH_RESETS, LIMITER_ENTRIES};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WINDOW_MINS: i64 = 15;
pub const DEFAULT_BLOCK_MINS: i64 = 30;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: TimeDelta,
    pub block_duration: TimeDelta,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: TimeDelta::minutes(DEFAULT_WINDOW_MINS),
            block_duration: TimeDelta::minutes(DEFAULT_BLOCK_MINS),
        }
    }
}

// Rate limit entry - failed attempts for one client
#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>, // only set once attempts >= max
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    pub blocked: bool,
    pub remaining_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub blocked: bool,
    pub attempts: u32,
    pub remaining_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_until_unblock: Option<i64>,
}

/// Login throttle keyed by client fingerprint.
///
/// Entries expire lazily: whoever looks at an entry after its window or
/// block has elapsed removes it. [`RateLimiter::purge_expired`] applies the
/// same rule to every entry at once.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    pub fn is_blocked(&self, identifier: &str) -> bool {
        let now = self.clock.now();

        let Some(entry) = self.entries.get(identifier) else {
            return false;
        };
        if let Some(until) = entry.blocked_until {
            if now < until {
                return true;
            }
        }
        let expired = self.is_expired(&entry, now);
        drop(entry); // release the shard lock before removing

        if expired {
            self.entries
                .remove_if(identifier, |_, e| self.is_expired(e, now));
            LIMITER_ENTRIES.set(self.entries.len() as f64);
            debug!(identifier, "rate limit entry expired");
        }
        false
    }

    pub fn record_failed_attempt(&self, identifier: &str) -> AttemptOutcome {
        let now = self.clock.now();
        AUTH_FAILURES.inc();

        let mut entry = self
            .entries
            .entry(identifier.to_string())
            .or_insert(RateLimitEntry {
                attempts: 0,
                last_attempt: now,
                blocked_until: None,
            });

        // window or block elapsed..? start counting again
        if self.is_expired(&entry, now) {
            entry.attempts = 0;
            entry.blocked_until = None;
        }

        entry.attempts += 1;
        entry.last_attempt = now;

        let outcome = if entry.attempts >= self.config.max_attempts {
            entry.blocked_until = Some(now + self.config.block_duration);
            AttemptOutcome {
                blocked: true,
                remaining_attempts: 0,
                block_duration_minutes: Some(self.config.block_duration.num_minutes()),
            }
        } else {
            AttemptOutcome {
                blocked: false,
                remaining_attempts: self.config.max_attempts - entry.attempts,
                block_duration_minutes: None,
            }
        };
        let attempts = entry.attempts;
        drop(entry);

        if outcome.blocked {
            AUTH_BLOCKS.inc();
            info!(identifier, attempts, "client blocked after repeated failed sign-ins");
        }
        LIMITER_ENTRIES.set(self.entries.len() as f64);
        outcome
    }

    pub fn record_successful_attempt(&self, identifier: &str) {
        if self.entries.remove(identifier).is_some() {
            AUTH_RESETS.inc();
            LIMITER_ENTRIES.set(self.entries.len() as f64);
        }
    }

    pub fn get_status(&self, identifier: &str) -> RateLimitStatus {
        let blocked = self.is_blocked(identifier);
        let now = self.clock.now();

        let Some(entry) = self.entries.get(identifier) else {
            return RateLimitStatus {
                blocked: false,
                attempts: 0,
                remaining_attempts: self.config.max_attempts,
                minutes_until_unblock: None,
            };
        };

        let minutes_until_unblock = match entry.blocked_until {
            Some(until) if blocked => Some(ceil_minutes(until - now)),
            _ => None,
        };

        RateLimitStatus {
            blocked,
            attempts: entry.attempts,
            remaining_attempts: self.config.max_attempts.saturating_sub(entry.attempts),
            minutes_until_unblock,
        }
    }

    // Sweep every entry that lazy expiry would drop. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e, now));
        let purged = before.saturating_sub(self.entries.len());
        LIMITER_ENTRIES.set(self.entries.len() as f64);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &RateLimitEntry, now: DateTime<Utc>) -> bool {
        match entry.blocked_until {
            Some(until) => now >= until,
            None => now - entry.last_attempt > self.config.window,
        }
    }
}

// Sweeper - drops expired entries on a fixed interval
pub async fn sweeper(limiter: Arc<RateLimiter>, every: Duration) {
    let mut interval = interval(every);

    info!(?every, "rate limit sweeper started");

    loop {
        interval.tick().await;

        let purged = limiter.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = limiter.len(), "purged expired rate limit entries");
        }
    }
}

fn ceil_minutes(d: TimeDelta) -> i64 {
    let ms = d.num_milliseconds().max(0);
    (ms + 59_999) / 60_000
}
