//! Relay pool - the WebSocket [`EventLog`]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::connection::{publish_to_relay, query_relay, RelaySubscription};
use super::{ConnectionConfig, EventLog, Filter, PoolMessage, PublishOutcome, RelayError, RelayRouter};
use crate::record::RawEvent;

/// Buffered messages between relay tasks and the ingest task
const POOL_CHANNEL_CAPACITY: usize = 1024;

pub struct RelayPool {
    router: Arc<RelayRouter>,
    config: ConnectionConfig,
}

impl RelayPool {
    pub fn new(router: Arc<RelayRouter>, config: ConnectionConfig) -> Self {
        Self { router, config }
    }
}

#[async_trait]
impl EventLog for RelayPool {
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<mpsc::Receiver<PoolMessage>, RelayError> {
        let (tx, rx) = mpsc::channel(POOL_CHANNEL_CAPACITY);
        let routes = self.router.route_filters(&filters).await;

        if routes.is_empty() {
            warn!("No relays to subscribe to");
        }

        for (url, relay_filters) in routes {
            let subscription = RelaySubscription::new(
                url,
                relay_filters,
                self.config.clone(),
                tx.clone(),
                self.router.clone(),
            );
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                subscription.run(shutdown).await;
            });
        }

        Ok(rx)
    }

    async fn query(&self, filters: Vec<Filter>) -> Result<Vec<RawEvent>, RelayError> {
        let routes = self.router.route_filters(&filters).await;
        if routes.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.config.request_timeout;
        let results = join_all(
            routes
                .into_iter()
                .map(|(url, relay_filters)| async move {
                    let result = query_relay(&url, relay_filters, timeout).await;
                    (url, result)
                }),
        )
        .await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut first_error = None;
        let mut any_ok = false;

        for (url, result) in results {
            match result {
                Ok(batch) => {
                    any_ok = true;
                    debug!(relay = %url, count = batch.len(), "Query returned events");
                    for event in batch {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "Query failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match (any_ok, first_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(events),
        }
    }

    async fn publish(&self, event: &RawEvent) -> Result<Vec<PublishOutcome>, RelayError> {
        let relays = self.router.route_event(event).await?;
        let timeout = self.config.request_timeout;

        let outcomes = join_all(relays.into_iter().map(|url| async move {
            match publish_to_relay(&url, event, timeout).await {
                Ok(outcome) => outcome,
                Err(e) => PublishOutcome {
                    relay: url,
                    accepted: false,
                    message: e.to_string(),
                },
            }
        }))
        .await;

        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        info!(
            event_id = %event.id,
            kind = event.kind,
            accepted,
            relays = outcomes.len(),
            "Published event"
        );

        Ok(outcomes)
    }
}
