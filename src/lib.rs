//! Sign-in throttling and live vote tallies for the Plyaz web client.
//!
//! Two pieces sit behind a small HTTP surface:
//! - [`rate_limit::RateLimiter`] counts failed sign-ins per client
//!   fingerprint and locks a client out for a while once it has used up its
//!   attempts. It is a UX throttle in front of the backend's own limits.
//! - [`reconciler::VoteReconciler`] watches a set of submissions, listens to
//!   row changes pushed by the backend and keeps vote aggregates current.

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod fingerprint;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod reconciler;
pub mod state;
