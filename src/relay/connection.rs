//! WebSocket connections to a single relay
//!
//! Three shapes of conversation:
//! - a long-lived subscription that reconnects until shutdown ([`RelaySubscription`])
//! - a one-shot query that collects stored events until EOSE ([`query_relay`])
//! - a publish that waits for the relay's OK ([`publish_to_relay`])

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ClientMessage, Filter, PoolMessage, PublishOutcome, RelayError, RelayMessage, RelayRouter};
use crate::config::RelayConfig;
use crate::record::RawEvent;

/// Connection tuning shared by all relays
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before reconnecting a dropped subscription
    pub reconnect_delay: Duration,
    /// Maximum consecutive failed attempts (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Deadline for one-shot queries and publishes
    pub request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 0, // Infinite
            ping_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RelayConfig> for ConnectionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            request_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

fn connect_error(url: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::Connect {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// How a connection ended
enum Disconnect {
    /// Shutdown requested or nobody is listening any more
    Stop,
    /// Relay went away; reconnect
    Dropped,
}

/// Live subscription against one relay, forwarding EVENT and EOSE frames
pub struct RelaySubscription {
    url: String,
    filters: Vec<Filter>,
    config: ConnectionConfig,
    tx: mpsc::Sender<PoolMessage>,
    router: Arc<RelayRouter>,
}

impl RelaySubscription {
    pub fn new(
        url: String,
        filters: Vec<Filter>,
        config: ConnectionConfig,
        tx: mpsc::Sender<PoolMessage>,
        router: Arc<RelayRouter>,
    ) -> Self {
        Self {
            url,
            filters,
            config,
            tx,
            router,
        }
    }

    /// Run until shutdown, reconnecting after each drop
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut reconnect_attempts = 0u32;

        loop {
            info!(relay = %self.url, "Connecting to relay");

            let mut subscribed = false;
            let outcome = self.connect_and_listen(&mut shutdown_rx, &mut subscribed).await;
            if subscribed {
                reconnect_attempts = 0;
            }

            match outcome {
                Ok(Disconnect::Stop) => break,
                Ok(Disconnect::Dropped) => {
                    self.router.set_status(&self.url, false, None);
                }
                Err(e) => {
                    warn!(relay = %self.url, error = %e, "Relay connection error");
                    self.router.set_status(&self.url, false, Some(e.to_string()));
                    reconnect_attempts += 1;

                    if self.config.max_reconnect_attempts > 0
                        && reconnect_attempts >= self.config.max_reconnect_attempts
                    {
                        error!(
                            relay = %self.url,
                            attempts = reconnect_attempts,
                            "Max reconnection attempts reached, giving up on relay"
                        );
                        break;
                    }
                }
            }

            if self.tx.is_closed() {
                break;
            }

            debug!(
                relay = %self.url,
                attempt = reconnect_attempts,
                "Reconnecting in {:?}",
                self.config.reconnect_delay
            );

            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.router.set_status(&self.url, false, None);
        info!(relay = %self.url, "Relay subscription stopped");
    }

    async fn connect_and_listen(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
        subscribed: &mut bool,
    ) -> Result<Disconnect, RelayError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| connect_error(&self.url, e))?;
        let (mut write, mut read) = ws_stream.split();

        let subscription_id = Uuid::new_v4().to_string();
        let req = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: self.filters.clone(),
        };
        write
            .send(Message::Text(req.to_json()?))
            .await
            .map_err(|e| connect_error(&self.url, e))?;

        *subscribed = true;
        self.router.set_status(&self.url, true, None);
        info!(relay = %self.url, subscription = %subscription_id, "Subscribed to relay");

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    if let Ok(close) = ClientMessage::Close(subscription_id.clone()).to_json() {
                        let _ = write.send(Message::Text(close)).await;
                    }
                    let _ = write.close().await;
                    return Ok(Disconnect::Stop);
                }

                _ = ping_interval.tick() => {
                    write
                        .send(Message::Ping(vec![]))
                        .await
                        .map_err(|e| RelayError::Protocol(format!("ping failed: {}", e)))?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_frame(&text, &subscription_id).await? {
                                return Ok(Disconnect::Stop);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(relay = %self.url, "Relay closed connection");
                            return Ok(Disconnect::Dropped);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(RelayError::Protocol(e.to_string())),
                        None => return Ok(Disconnect::Dropped),
                    }
                }
            }
        }
    }

    /// Returns false once the consumer has gone away
    async fn handle_frame(&self, text: &str, subscription_id: &str) -> Result<bool, RelayError> {
        let message = match RelayMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(relay = %self.url, error = %e, "Ignoring unparseable frame");
                return Ok(true);
            }
        };

        match &message {
            RelayMessage::Event {
                subscription_id: sub,
                ..
            }
            | RelayMessage::Eose(sub) => {
                if sub != subscription_id {
                    return Ok(true);
                }
            }
            RelayMessage::Closed {
                subscription_id: sub,
                message,
            } if sub == subscription_id => {
                return Err(RelayError::Protocol(format!("subscription closed: {}", message)));
            }
            RelayMessage::Notice(notice) => {
                info!(relay = %self.url, notice = %notice, "Relay notice");
                return Ok(true);
            }
            _ => return Ok(true),
        }

        let forwarded = PoolMessage {
            relay: self.url.clone(),
            message,
        };
        Ok(self.tx.send(forwarded).await.is_ok())
    }
}

/// Collect stored events matching `filters` until EOSE or the deadline.
/// Events received before the deadline are returned even if EOSE never arrives.
pub async fn query_relay(
    url: &str,
    filters: Vec<Filter>,
    request_timeout: Duration,
) -> Result<Vec<RawEvent>, RelayError> {
    let deadline = Instant::now() + request_timeout;

    let (ws_stream, _) = timeout_at(deadline, connect_async(url))
        .await
        .map_err(|_| RelayError::Timeout(format!("connection to {}", url)))?
        .map_err(|e| connect_error(url, e))?;
    let (mut write, mut read) = ws_stream.split();

    let subscription_id = Uuid::new_v4().to_string();
    let req = ClientMessage::Req {
        subscription_id: subscription_id.clone(),
        filters,
    };
    write
        .send(Message::Text(req.to_json()?))
        .await
        .map_err(|e| connect_error(url, e))?;

    let mut events = Vec::new();
    loop {
        let frame = match timeout_at(deadline, read.next()).await {
            Ok(Some(frame)) => frame.map_err(|e| RelayError::Protocol(e.to_string()))?,
            Ok(None) => break,
            Err(_) => {
                debug!(relay = %url, received = events.len(), "Query deadline reached before EOSE");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match RelayMessage::parse(&text) {
            Ok(RelayMessage::Event {
                subscription_id: sub,
                event,
            }) if sub == subscription_id => events.push(event),
            Ok(RelayMessage::Eose(sub)) if sub == subscription_id => break,
            Ok(RelayMessage::Closed {
                subscription_id: sub,
                message,
            }) if sub == subscription_id => {
                return Err(RelayError::Protocol(format!("query closed: {}", message)));
            }
            Ok(_) => {}
            Err(e) => debug!(relay = %url, error = %e, "Ignoring unparseable frame"),
        }
    }

    if let Ok(close) = ClientMessage::Close(subscription_id).to_json() {
        let _ = write.send(Message::Text(close)).await;
    }
    let _ = write.close().await;

    Ok(events)
}

/// Send a signed event and wait for the relay's OK
pub async fn publish_to_relay(
    url: &str,
    event: &RawEvent,
    request_timeout: Duration,
) -> Result<PublishOutcome, RelayError> {
    timeout(request_timeout, publish_exchange(url, event))
        .await
        .map_err(|_| RelayError::Timeout(format!("OK from {}", url)))?
}

async fn publish_exchange(url: &str, event: &RawEvent) -> Result<PublishOutcome, RelayError> {
    let (ws_stream, _) = connect_async(url).await.map_err(|e| connect_error(url, e))?;
    let (mut write, mut read) = ws_stream.split();

    let frame = ClientMessage::Event(event.clone()).to_json()?;
    write
        .send(Message::Text(frame))
        .await
        .map_err(|e| connect_error(url, e))?;

    while let Some(frame) = read.next().await {
        let text = match frame.map_err(|e| RelayError::Protocol(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if let Ok(RelayMessage::Ok {
            event_id,
            accepted,
            message,
        }) = RelayMessage::parse(&text)
        {
            if event_id == event.id {
                let _ = write.close().await;
                return Ok(PublishOutcome {
                    relay: url.to_string(),
                    accepted,
                    message,
                });
            }
        }
    }

    Err(RelayError::Closed)
}
