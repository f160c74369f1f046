//! Feed - event normalization and replay-safe deduplication
//!
//! Relays deliver records at least once, in no particular order, and several
//! relays may deliver the same record. The feed turns every raw record into a
//! uniform [`ProcessedEvent`] and keeps one entry per logical slot:
//!
//! - same `id` twice: dropped
//! - same replaceable key, not newer: dropped
//! - same replaceable key, strictly newer: replaces the old entry
//!
//! Entries are kept newest-insertion-first. Out-of-order arrivals are only
//! superseded in place, never re-sorted by timestamp.

pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::record::{RawEvent, ACK_KIND, DIRECTIVE_KIND};

pub use store::{spawn_ingest_task, Feed, FeedStatus, IngestOutcome};

/// Network used when a record carries no `network` tag
pub const FALLBACK_NETWORK: &str = "hqz";

/// Version used when a record carries no `version` tag
pub const FALLBACK_VERSION: &str = "0.0.0";

/// Outer classification of a processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    Signal,
    Ack,
}

impl EventClass {
    pub fn label(&self) -> &'static str {
        match self {
            EventClass::Signal => "signal",
            EventClass::Ack => "ack",
        }
    }
}

/// Display identity attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub picture: String,
}

/// Identity shown when no profile is known: the last six characters of the pubkey
pub fn fallback_author(pubkey: &str) -> Author {
    if pubkey.is_empty() {
        return Author {
            name: "Unknown".to_string(),
            picture: String::new(),
        };
    }

    let start = pubkey
        .char_indices()
        .rev()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(0);
    Author {
        name: format!("...{}", &pubkey[start..]),
        picture: String::new(),
    }
}

/// Uniform shape the plan engine and the API work with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub class: EventClass,
    /// Inner action, for display and plan matching
    pub action: String,
    pub network: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub author: Author,
    pub content: String,
    /// The originating record
    pub raw: RawEvent,
}

/// Map a raw record into the uniform shape
pub fn normalize(raw: &RawEvent, author: Author) -> ProcessedEvent {
    let class = if raw.kind == ACK_KIND {
        EventClass::Ack
    } else {
        EventClass::Signal
    };

    let action = match class {
        EventClass::Ack => raw.tag_value("action"),
        EventClass::Signal => raw.tag_value("action").or_else(|| raw.tag_value("status")),
    }
    .unwrap_or("unknown")
    .to_string();

    let owned = |name: &str| raw.tag_value(name).map(str::to_string);

    ProcessedEvent {
        id: raw.id.clone(),
        pubkey: raw.pubkey.clone(),
        created_at: raw.created_at,
        kind: raw.kind,
        class,
        action,
        network: raw.tag_value("network").unwrap_or(FALLBACK_NETWORK).to_string(),
        version: raw.tag_value("version").unwrap_or(FALLBACK_VERSION).to_string(),
        hash: owned("hash"),
        slot: owned("d"),
        status: owned("status"),
        error: owned("error"),
        node_id: owned("node_id"),
        author,
        content: raw.content.clone(),
        raw: raw.clone(),
    }
}

/// Logical slot key `"{kind}:{pubkey}:{d}"` for addressable kinds
pub fn replaceable_key(event: &ProcessedEvent) -> Option<String> {
    match event.kind {
        DIRECTIVE_KIND | ACK_KIND => Some(format!(
            "{}:{}:{}",
            event.kind,
            event.pubkey,
            event.slot.as_deref().unwrap_or_default()
        )),
        _ => None,
    }
}

/// Deduplicated events, newest insertion first
#[derive(Debug, Clone, Default)]
pub struct EventCollection {
    events: VecDeque<ProcessedEvent>,
    ids: HashSet<String>,
    /// Replaceable key to the id currently holding that slot
    slots: HashMap<String, String>,
}

impl EventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the record is a duplicate or stale. Returns whether it was inserted.
    pub fn upsert(&mut self, processed: ProcessedEvent) -> bool {
        if self.ids.contains(&processed.id) {
            return false;
        }

        let key = replaceable_key(&processed);
        if let Some(holder) = key.as_ref().and_then(|k| self.slots.get(k)) {
            let Some(index) = self.events.iter().position(|e| &e.id == holder) else {
                return false;
            };
            if self.events[index].created_at >= processed.created_at {
                return false;
            }
            if let Some(replaced) = self.events.remove(index) {
                self.ids.remove(&replaced.id);
            }
        }

        if let Some(key) = key {
            self.slots.insert(key, processed.id.clone());
        }
        self.ids.insert(processed.id.clone());
        self.events.push_front(processed);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedEvent> {
        self.events.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ProcessedEvent> {
        if !self.ids.contains(id) {
            return None;
        }
        self.events.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ProcessedEvent> {
        self.events.iter().cloned().collect()
    }
}
