//! Relay transport
//!
//! The event log the rest of the service reads from and writes to is a set of
//! Nostr relays. Everything above this module talks to it through
//! [`EventLog`], so tests can substitute an in-memory log.
//!
//! ```text
//! ┌──────────────┐  route_filters   ┌──────────────────┐
//! │  RelayPool   │ ───────────────► │ public relays    │  kind 0, ...
//! │ (EventLog)   │                  └──────────────────┘
//! │              │  app-only kinds  ┌──────────────────┐
//! │              │ ───────────────► │ special relays   │  33321, 3333
//! └──────┬───────┘                  └──────────────────┘
//!        │ PoolMessage (mpsc)
//!        ▼
//!    ingest task
//! ```

pub mod connection;
pub mod message;
pub mod pool;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::record::RawEvent;

pub use connection::ConnectionConfig;
pub use message::{ClientMessage, Filter, PoolMessage, RelayMessage};
pub use pool::RelayPool;
pub use router::{validate_relay_url, RelayRouter, RelayStatus};

/// Relay transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid relay URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Relay already configured: {0}")]
    DuplicateRelay(String),

    #[error("Relay not configured: {0}")]
    UnknownRelay(String),

    #[error("No special relays configured for app-only kind {0}")]
    NoSpecialRelays(u16),

    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,
}

/// Result of publishing to one relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub relay: String,
    pub accepted: bool,
    pub message: String,
}

/// The shared append-only event log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Open a live subscription. Messages from every routed relay arrive on
    /// the returned channel until `shutdown` fires.
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<mpsc::Receiver<PoolMessage>, RelayError>;

    /// One-shot query, de-duplicated by event id
    async fn query(&self, filters: Vec<Filter>) -> Result<Vec<RawEvent>, RelayError>;

    /// Publish a signed record to every routed relay
    async fn publish(&self, event: &RawEvent) -> Result<Vec<PublishOutcome>, RelayError>;
}
