use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const VOTES_TABLE: &str = "votes";
pub const SUBMISSIONS_TABLE: &str = "submissions";

// Buffered messages per subscriber before the forwarder waits
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change, in the shape database webhooks deliver it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    // Column value from the new row, falling back to the old one (deletes)
    pub fn column(&self, name: &str) -> Option<&str> {
        self.record
            .as_ref()
            .and_then(|r| r.get(name))
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get(name)))
            .and_then(Value::as_str)
    }

    /// The submission this change is about, if any.
    pub fn submission_id(&self) -> Option<&str> {
        match self.table.as_str() {
            VOTES_TABLE => self.column("submission_id"),
            SUBMISSIONS_TABLE => self.column("id"),
            _ => None,
        }
    }
}

/// Which changes a subscriber wants: vote log inserts/updates/deletes and
/// summary updates, for a fixed set of submissions.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    submission_ids: HashSet<String>,
}

impl ChangeFilter {
    pub fn for_submissions<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            submission_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let wanted_kind = match event.table.as_str() {
            VOTES_TABLE => true,
            SUBMISSIONS_TABLE => event.kind == ChangeKind::Update,
            _ => false,
        };
        if !wanted_kind {
            return false;
        }
        match event.submission_id() {
            Some(id) => self.submission_ids.contains(id),
            None => {
                debug!(table = %event.table, kind = ?event.kind, "change without a text submission id, skipping");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Event(ChangeEvent),
    Error(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("change feed is closed")]
    Closed,
}

/// A live subscription. Dropping it releases the channel.
pub struct Subscription {
    rx: mpsc::Receiver<FeedMessage>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn from_receiver(rx: mpsc::Receiver<FeedMessage>) -> Self {
        Self { rx, forwarder: None }
    }

    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, FeedError>;
}

/// In-process change feed. Webhook deliveries are published here and fanned
/// out to every subscriber whose filter matches.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    // Returns how many subscribers saw the event
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChangeFeed for ChangeHub {
    fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, FeedError> {
        let mut events = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !filter.matches(&event) {
                            continue;
                        }
                        if tx.send(FeedMessage::Event(event)).await.is_err() {
                            break; // subscriber went away
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "change feed subscriber fell behind");
                        let _ = tx
                            .send(FeedMessage::Error(format!("missed {missed} change events")))
                            .await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(FeedMessage::Error("change feed closed".into())).await;
                        break;
                    }
                }
            }
            debug!("change feed forwarder stopped");
        });

        Ok(Subscription {
            rx,
            forwarder: Some(forwarder),
        })
    }
}
