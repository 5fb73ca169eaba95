//! Keeps vote aggregates for a set of submissions in step with the backend.
//!
//! The aggregate counters always come from the submission summary record,
//! either fetched after a vote log change or pushed by a summary update. Each
//! merge carries the sequence number of the event that caused it, and a merge
//! older than what is already stored for that submission is ignored. That
//! makes replays and slow fetches harmless.

use chrono::TimeDelta;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backend::VoteSource;
use crate::clock::Clock;
use crate::feed::{
    ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, FeedMessage, Subscription,
    SUBMISSIONS_TABLE, VOTES_TABLE,
};
use crate::metrics::{CHANGE_EVENTS, FETCH_FAILURES, WATCHED_SUBMISSIONS};
use crate::models::{LatestVote, SubmissionSummary, VoteRow, VoteUpdate};

pub const DEFAULT_ACTIVITY_MINUTES: i64 = 5;
pub const ANONYMOUS_VOTER: &str = "Anonymous";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Stored aggregate plus the sequence of the merge that produced it
struct Versioned {
    seq: u64,
    update: VoteUpdate,
}

struct Shared<S> {
    source: S,
    clock: Arc<dyn Clock>,
    updates: DashMap<String, Versioned>,
    watched: DashSet<String>,
    generation: AtomicU64,
    seq: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
}

impl<S: VoteSource> Shared<S> {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64, submission_id: &str) -> bool {
        self.generation.load(Ordering::SeqCst) == generation && self.watched.contains(submission_id)
    }

    fn merge(&self, generation: u64, seq: u64, mut update: VoteUpdate) -> bool {
        if !self.is_current(generation, &update.submission_id) {
            debug!(submission_id = %update.submission_id, "dropping merge for unwatched submission");
            return false;
        }

        let entry = self.updates.entry(update.submission_id.clone());
        // a teardown may have finished since the check above; the shard lock
        // held by `entry` keeps its `retain` out until this merge is done
        if !self.is_current(generation, &update.submission_id) {
            debug!(submission_id = %update.submission_id, "dropping merge raced by teardown");
            return false;
        }

        match entry {
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                let latest = newest(stored.update.latest_vote.take(), update.latest_vote.take());
                if seq >= stored.seq {
                    update.latest_vote = latest;
                    *stored = Versioned { seq, update };
                    true
                } else {
                    // counters are stale, the latest vote may still be news
                    stored.update.latest_vote = latest;
                    debug!(
                        submission_id = %stored.update.submission_id,
                        seq,
                        stored_seq = stored.seq,
                        "ignoring out-of-order aggregate"
                    );
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Versioned { seq, update });
                true
            }
        }
    }

    fn set_status(&self, is_connected: bool, error: Option<String>) {
        self.status.send_replace(ConnectionStatus {
            is_connected,
            error,
        });
    }

    async fn initial_pass(&self, generation: u64, seq: u64, ids: &[String]) {
        match self.source.fetch_summaries(ids).await {
            Ok(summaries) => {
                for summary in &summaries {
                    self.merge(generation, seq, VoteUpdate::from_summary(summary));
                }
                debug!(count = summaries.len(), "initial vote aggregates loaded");
            }
            Err(e) => {
                FETCH_FAILURES.inc();
                warn!(error = %e, "initial vote aggregate fetch failed");
            }
        }
    }

    // Vote log changed: pull the authoritative counters for that submission
    async fn refresh_from_vote(&self, generation: u64, seq: u64, event: ChangeEvent) {
        let Some(submission_id) = event.submission_id().map(str::to_string) else {
            return;
        };

        let summary = match self.source.fetch_summaries(std::slice::from_ref(&submission_id)).await {
            Ok(rows) => rows.into_iter().find(|s| s.id == submission_id),
            Err(e) => {
                FETCH_FAILURES.inc();
                warn!(%submission_id, error = %e, "vote aggregate fetch failed, keeping last value");
                return;
            }
        };
        let Some(summary) = summary else {
            warn!(%submission_id, "submission vanished while refreshing votes");
            return;
        };

        let mut update = VoteUpdate::from_summary(&summary);
        if event.kind == ChangeKind::Insert {
            update.latest_vote = self.latest_vote(&event).await;
        }
        self.merge(generation, seq, update);
    }

    async fn latest_vote(&self, event: &ChangeEvent) -> Option<LatestVote> {
        let row: VoteRow = match event.record.clone().map(serde_json::from_value) {
            Some(Ok(row)) => row,
            Some(Err(e)) => {
                warn!(error = %e, "vote insert without a readable row");
                return None;
            }
            None => return None,
        };

        let voter_username = match self.source.fetch_voter_name(&row.voter_id).await {
            Ok(Some(name)) => name,
            Ok(None) => ANONYMOUS_VOTER.to_string(),
            Err(e) => {
                debug!(voter_id = %row.voter_id, error = %e, "voter lookup failed");
                ANONYMOUS_VOTER.to_string()
            }
        };

        Some(LatestVote {
            id: row.id,
            vote_type: row.vote_type,
            confidence: row.confidence,
            voter_username,
            created_at: row.created_at,
        })
    }

    // Summary record pushed its new counters: no round trip needed
    fn apply_summary_push(&self, generation: u64, seq: u64, event: &ChangeEvent) {
        let summary = event
            .record
            .clone()
            .map(serde_json::from_value::<SubmissionSummary>);
        match summary {
            Some(Ok(summary)) => {
                self.merge(generation, seq, VoteUpdate::from_summary(&summary));
            }
            Some(Err(e)) => warn!(error = %e, "unreadable submission summary update"),
            None => warn!("submission summary update without a record"),
        }
    }
}

// Keep whichever vote was cast last
fn newest(a: Option<LatestVote>, b: Option<LatestVote>) -> Option<LatestVote> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.created_at >= a.created_at { b } else { a }),
        (a, b) => a.or(b),
    }
}

async fn run_subscription<S: VoteSource>(
    shared: Arc<Shared<S>>,
    mut subscription: Subscription,
    generation: u64,
) {
    let mut in_flight = JoinSet::new();

    while let Some(msg) = subscription.next().await {
        while in_flight.try_join_next().is_some() {}

        let event = match msg {
            FeedMessage::Event(event) => event,
            FeedMessage::Error(e) => {
                warn!(error = %e, "vote subscription failed");
                shared.set_status(false, Some(e));
                return;
            }
        };

        let seq = shared.next_seq();
        let table = event.table.clone();
        match table.as_str() {
            VOTES_TABLE => {
                CHANGE_EVENTS.with_label_values(&[VOTES_TABLE, "fetch"]).inc();
                let shared = Arc::clone(&shared);
                in_flight.spawn(async move {
                    shared.refresh_from_vote(generation, seq, event).await;
                });
            }
            SUBMISSIONS_TABLE => {
                CHANGE_EVENTS.with_label_values(&[SUBMISSIONS_TABLE, "push"]).inc();
                shared.apply_summary_push(generation, seq, &event);
            }
            other => {
                CHANGE_EVENTS.with_label_values(&[other, "ignored"]).inc();
            }
        }
    }

    shared.set_status(false, Some("vote subscription closed".to_string()));
}

/// Live vote tallies for the submissions currently on screen.
pub struct VoteReconciler<S, F> {
    shared: Arc<Shared<S>>,
    feed: F,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: VoteSource, F: ChangeFeed> VoteReconciler<S, F> {
    pub fn new(source: S, feed: F, clock: Arc<dyn Clock>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            shared: Arc::new(Shared {
                source,
                clock,
                updates: DashMap::new(),
                watched: DashSet::new(),
                generation: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                status,
            }),
            feed,
            task: Mutex::new(None),
        }
    }

    /// Replace the watched set. Tears down the previous subscription, opens a
    /// new one and loads current aggregates before returning.
    pub async fn watch<I, T>(&self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
        let mut task = self.task.lock().await;

        let generation = self.teardown(&mut task, &ids);
        if ids.is_empty() {
            return;
        }

        // drawn before subscribing so any event that follows outranks it
        let initial_seq = self.shared.next_seq();

        let subscription = match self.feed.subscribe(ChangeFilter::for_submissions(ids.iter().cloned())) {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "could not subscribe to vote changes");
                self.shared.set_status(false, Some(e.to_string()));
                return;
            }
        };
        self.shared.set_status(true, None);
        info!(count = ids.len(), "watching submissions for vote changes");

        *task = Some(tokio::spawn(run_subscription(
            Arc::clone(&self.shared),
            subscription,
            generation,
        )));

        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        self.shared.initial_pass(generation, initial_seq, &ids).await;
    }

    pub async fn unwatch(&self) {
        let mut task = self.task.lock().await;
        self.teardown(&mut task, &HashSet::new());
    }

    // Stop the old subscription and forget submissions no longer watched.
    // Returns the new generation.
    fn teardown(&self, task: &mut Option<JoinHandle<()>>, keep: &HashSet<String>) -> u64 {
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shared.watched.retain(|id| keep.contains(id));
        for id in keep {
            self.shared.watched.insert(id.clone());
        }
        self.shared.updates.retain(|id, _| keep.contains(id));
        WATCHED_SUBMISSIONS.set(keep.len() as f64);

        self.shared.set_status(false, None);
        generation
    }

    pub fn get_vote_update(&self, submission_id: &str) -> Option<VoteUpdate> {
        self.shared
            .updates
            .get(submission_id)
            .map(|v| v.update.clone())
    }

    /// Whether the last observed vote on a submission landed within the
    /// trailing `minutes` window.
    pub fn has_recent_activity(&self, submission_id: &str, minutes: i64) -> bool {
        let Some(entry) = self.shared.updates.get(submission_id) else {
            return false;
        };
        let Some(latest) = &entry.update.latest_vote else {
            return false;
        };
        // a window too wide to represent covers every vote ever cast
        match TimeDelta::try_minutes(minutes) {
            Some(window) => self.shared.clock.now() - latest.created_at <= window,
            None => minutes > 0,
        }
    }

    pub fn snapshot(&self) -> Vec<VoteUpdate> {
        let mut all: Vec<VoteUpdate> = self
            .shared
            .updates
            .iter()
            .map(|v| v.update.clone())
            .collect();
        all.sort_by(|a, b| a.submission_id.cmp(&b.submission_id));
        all
    }

    pub fn watched_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.watched.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }
}

impl<S, F> Drop for VoteReconciler<S, F> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}
