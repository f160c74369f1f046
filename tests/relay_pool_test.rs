//! Relay pool against an in-process relay

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hypersignal::config::Config;
use hypersignal::plan::now;
use hypersignal::record::{
    build_acknowledgement, build_directive, AckFields, AckStatus, Action, DirectiveFields,
    RawEvent, ACK_KIND, DIRECTIVE_KIND,
};
use hypersignal::relay::{
    ConnectionConfig, EventLog, Filter, RelayError, RelayMessage, RelayPool, RelayRouter,
};
use hypersignal::service::AppContext;

const A: &str = "706c6320ad12b03a3ddc978f6fbd6d5b3eb1484c56f2f20b4df04545015e6c86";
const B: &str = "80ebe917ae63946ebf7577bcf68d43ff89f102a6596d41e7f1bd6f43c311dc89";
const NODE: &str = "ee2c1d50281983a1abd271d41d1f0ca7943390c8ec261e826d56c5930de54623";

type Published = Arc<Mutex<Vec<RawEvent>>>;

fn directive(signer: &str, created_at: u64) -> RawEvent {
    let fields = DirectiveFields {
        pubkey: signer.to_string(),
        version: "1.2.3".to_string(),
        hash: "abc123def456".to_string(),
        network: "hqz".to_string(),
        action: Action::Upgrade,
        content: String::new(),
        genesis_url: None,
        required_by: None,
    };
    build_directive(&fields, created_at)
        .unwrap()
        .into_signed(String::new())
}

fn ack(created_at: u64) -> RawEvent {
    let fields = AckFields {
        pubkey: NODE.to_string(),
        directive_pubkey: A.to_string(),
        version: "1.2.3".to_string(),
        network: "hqz".to_string(),
        action: Action::Upgrade,
        status: AckStatus::Success,
        node_id: "node_xyz".to_string(),
        content: String::new(),
        error: None,
        relay_url: None,
        action_at: None,
    };
    build_acknowledgement(&fields, created_at)
        .unwrap()
        .into_signed(String::new())
}

async fn send(
    write: &mut (impl SinkExt<Message> + Unpin),
    message: RelayMessage,
) {
    let _ = write.send(Message::Text(message.to_json().unwrap())).await;
}

/// Minimal relay: answers REQ with `stored` then EOSE, and OKs every EVENT
async fn spawn_relay(stored: Vec<RawEvent>) -> (String, Published) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let published: Published = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stored = stored.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();

                while let Some(Ok(msg)) = read.next().await {
                    let Message::Text(text) = msg else { continue };
                    let frame: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();

                    match frame[0].as_str() {
                        Some("REQ") => {
                            let sub = frame[1].as_str().unwrap().to_string();
                            for event in &stored {
                                send(
                                    &mut write,
                                    RelayMessage::Event {
                                        subscription_id: sub.clone(),
                                        event: event.clone(),
                                    },
                                )
                                .await;
                            }
                            send(&mut write, RelayMessage::Eose(sub)).await;
                        }
                        Some("EVENT") => {
                            let event: RawEvent = serde_json::from_value(frame[1].clone()).unwrap();
                            let event_id = event.id.clone();
                            sink.lock().unwrap().push(event);
                            send(
                                &mut write,
                                RelayMessage::Ok {
                                    event_id,
                                    accepted: true,
                                    message: String::new(),
                                },
                            )
                            .await;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), published)
}

fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect_delay: Duration::from_millis(100),
        request_timeout: Duration::from_secs(5),
        ..ConnectionConfig::default()
    }
}

fn pool(special: Vec<String>) -> RelayPool {
    let router = Arc::new(RelayRouter::new(vec![], special));
    RelayPool::new(router, connection_config())
}

#[tokio::test]
async fn test_query_dedups_across_relays() {
    let stored = vec![directive(A, 1000), directive(B, 1100), ack(1200)];
    let (first, _) = spawn_relay(stored.clone()).await;
    let (second, _) = spawn_relay(stored).await;

    let events = pool(vec![first, second])
        .query(vec![Filter::new().kinds([DIRECTIVE_KIND, ACK_KIND])])
        .await
        .unwrap();

    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_publish_reports_per_relay() {
    let (url, published) = spawn_relay(vec![]).await;
    let pool = pool(vec![url.clone()]);
    let event = directive(A, 1000);

    let outcomes = pool.publish(&event).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].relay, url);
    assert!(outcomes[0].accepted);
    assert_eq!(published.lock().unwrap()[0].id, event.id);
}

#[tokio::test]
async fn test_publish_unreachable_relay_is_not_accepted() {
    let pool = pool(vec!["ws://127.0.0.1:1".to_string()]);
    let outcomes = pool.publish(&directive(A, 1000)).await.unwrap();
    assert!(!outcomes[0].accepted);
    assert!(!outcomes[0].message.is_empty());
}

#[tokio::test]
async fn test_publish_without_special_relays() {
    let pool = pool(vec![]);
    assert_eq!(
        pool.publish(&directive(A, 1000)).await.unwrap_err(),
        RelayError::NoSpecialRelays(DIRECTIVE_KIND)
    );
}

#[tokio::test]
async fn test_subscription_feeds_the_plan() {
    let t = now();
    let (url, _) = spawn_relay(vec![directive(A, t - 20), directive(B, t - 10), ack(t - 5)]).await;

    let mut config = Config::default();
    config.signal.authorized_pubkeys = vec![A.to_string(), B.to_string()];
    config.relays.public_relays = vec![];
    config.relays.special_relays = vec![url];

    let ctx = AppContext::new(config);
    let handles = ctx.start().await.unwrap();

    let mut plans = ctx.engine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let plan = plans.borrow();
                if plan.is_active && plan.signed_pubkeys.len() == 2 {
                    break;
                }
            }
            plans.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let plan = ctx.engine.current();
    assert_eq!(plan.action.as_deref(), Some("upgrade"));
    assert_eq!(plan.signed_pubkeys, [A, B]);
    assert!(plan.pending_pubkeys.is_empty());

    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.feed.acks().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(ctx.feed.acks().await[0].node_id.as_deref(), Some("node_xyz"));

    ctx.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

/// Relay that accepts every REQ and then closes the subscription
async fn spawn_closing_relay() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();

                while let Some(Ok(msg)) = read.next().await {
                    let Message::Text(text) = msg else { continue };
                    let frame: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
                    if frame[0].as_str() == Some("REQ") {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let sub = frame[1].as_str().unwrap().to_string();
                        send(
                            &mut write,
                            RelayMessage::Closed {
                                subscription_id: sub,
                                message: "restricted".to_string(),
                            },
                        )
                        .await;
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), requests)
}

#[tokio::test]
async fn test_subscribed_relay_keeps_reconnecting_after_errors() {
    let (url, requests) = spawn_closing_relay().await;
    let router = Arc::new(RelayRouter::new(vec![], vec![url]));
    let pool = RelayPool::new(
        router,
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_attempts: 2,
            ..connection_config()
        },
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let _rx = pool
        .subscribe(vec![Filter::new().kinds([DIRECTIVE_KIND])], &shutdown_tx)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while requests.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let _ = shutdown_tx.send(());
}
