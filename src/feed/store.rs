//! Feed store - the single mutation point for received records
//!
//! ```text
//! relays ──► mpsc ──► ingest task ──► Feed::ingest ──► watch<revision>
//!                                      (one write lock)        │
//!                                                              ▼
//!                                                        plan engine, API
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{normalize, EventClass, EventCollection, ProcessedEvent};
use crate::profile::{Profile, ProfileCache};
use crate::record::{parse_record, RawEvent, ValidationError, METADATA_KIND};
use crate::relay::{PoolMessage, RelayMessage};

/// What happened to one received record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(EventClass),
    /// Duplicate or stale
    Ignored,
    Rejected(ValidationError),
    Unsupported(u16),
}

/// Snapshot of the feed counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub bootstrapping: bool,
    pub signals: usize,
    pub acks: usize,
    pub revision: u64,
    pub profiles: usize,
}

struct FeedState {
    signals: EventCollection,
    acks: EventCollection,
    bootstrapping: bool,
}

/// Signals and acknowledgements received so far
pub struct Feed {
    state: RwLock<FeedState>,
    revision: watch::Sender<u64>,
    profiles: Arc<ProfileCache>,
}

impl Feed {
    pub fn new(profiles: Arc<ProfileCache>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(FeedState {
                signals: EventCollection::new(),
                acks: EventCollection::new(),
                bootstrapping: true,
            }),
            revision,
            profiles,
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileCache> {
        &self.profiles
    }

    /// Validate, normalize and upsert one record
    pub async fn ingest(&self, raw: &RawEvent) -> IngestOutcome {
        match parse_record(raw) {
            Ok(_) => {}
            Err(ValidationError::UnsupportedKind(kind)) => {
                debug!(event_id = %raw.id, kind, "Ignoring unsupported kind");
                return IngestOutcome::Unsupported(kind);
            }
            Err(e) => {
                warn!(event_id = %raw.id, kind = raw.kind, error = %e, "Skipping invalid record");
                return IngestOutcome::Rejected(e);
            }
        }

        let processed = normalize(raw, self.profiles.author_for(&raw.pubkey));
        let class = processed.class;

        let inserted = {
            let mut state = self.state.write().await;
            state.bootstrapping = false;
            match class {
                EventClass::Signal => state.signals.upsert(processed),
                EventClass::Ack => state.acks.upsert(processed),
            }
        };

        if !inserted {
            debug!(event_id = %raw.id, "Duplicate or stale record ignored");
            return IngestOutcome::Ignored;
        }

        self.bump();
        debug!(
            event_id = %raw.id,
            pubkey = %raw.pubkey,
            class = class.label(),
            "Record added to feed"
        );
        IngestOutcome::Inserted(class)
    }

    /// Route one relay message into the feed
    pub async fn apply(&self, message: PoolMessage) {
        match message.message {
            RelayMessage::Event { event, .. } if event.kind == METADATA_KIND => {
                if let Some(profile) = Profile::from_event(&event) {
                    self.profiles.insert(profile);
                }
            }
            RelayMessage::Event { event, .. } => {
                self.ingest(&event).await;
            }
            RelayMessage::Eose(_) => {
                debug!(relay = %message.relay, "End of stored events");
                self.mark_bootstrapped().await;
            }
            _ => {}
        }
    }

    pub async fn mark_bootstrapped(&self) {
        let changed = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut state.bootstrapping, false)
        };
        if changed {
            info!("Feed bootstrapped");
            self.bump();
        }
    }

    pub async fn is_bootstrapping(&self) -> bool {
        self.state.read().await.bootstrapping
    }

    /// Signals, newest insertion first
    pub async fn signals(&self) -> Vec<ProcessedEvent> {
        self.state.read().await.signals.to_vec()
    }

    /// Acknowledgements, newest insertion first
    pub async fn acks(&self) -> Vec<ProcessedEvent> {
        self.state.read().await.acks.to_vec()
    }

    pub async fn status(&self) -> FeedStatus {
        let state = self.state.read().await;
        FeedStatus {
            bootstrapping: state.bootstrapping,
            signals: state.signals.len(),
            acks: state.acks.len(),
            revision: *self.revision.borrow(),
            profiles: self.profiles.len(),
        }
    }

    /// Revision counter, bumped on every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Drain relay messages into the feed. Clears the bootstrapping flag after
/// `grace` even if no relay answers.
pub fn spawn_ingest_task(
    feed: Arc<Feed>,
    mut rx: mpsc::Receiver<PoolMessage>,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Ingest task started");

        let grace_timer = sleep(grace);
        tokio::pin!(grace_timer);
        let mut grace_elapsed = false;

        loop {
            tokio::select! {
                _ = &mut grace_timer, if !grace_elapsed => {
                    grace_elapsed = true;
                    feed.mark_bootstrapped().await;
                }

                message = rx.recv() => {
                    match message {
                        Some(message) => feed.apply(message).await,
                        None => {
                            feed.mark_bootstrapped().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("Ingest task stopped");
    })
}
