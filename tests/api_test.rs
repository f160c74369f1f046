//! API handlers over an in-memory event log

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio::sync::{broadcast, mpsc};

use hypersignal::api::routes::{self, ListQuery, RelayRequest};
use hypersignal::api::ApiError;
use hypersignal::config::Config;
use hypersignal::plan::now;
use hypersignal::record::{
    build_directive, Action, DirectiveFields, RawEvent, ValidationError, METADATA_KIND,
};
use hypersignal::relay::{
    EventLog, Filter, PoolMessage, PublishOutcome, RelayError, RelayMessage, RelayRouter,
};
use hypersignal::service::AppContext;

const A: &str = "706c6320ad12b03a3ddc978f6fbd6d5b3eb1484c56f2f20b4df04545015e6c86";
const B: &str = "80ebe917ae63946ebf7577bcf68d43ff89f102a6596d41e7f1bd6f43c311dc89";

#[derive(Default)]
struct MemoryLog {
    stored: Vec<RawEvent>,
    published: Mutex<Vec<RawEvent>>,
}

fn matches(filter: &Filter, event: &RawEvent) -> bool {
    filter.kinds.as_ref().map_or(true, |k| k.contains(&event.kind))
        && filter
            .authors
            .as_ref()
            .map_or(true, |a| a.contains(&event.pubkey))
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        _shutdown: &broadcast::Sender<()>,
    ) -> Result<mpsc::Receiver<PoolMessage>, RelayError> {
        let (tx, rx) = mpsc::channel(self.stored.len() + 1);
        for event in self.stored.iter().filter(|e| filters.iter().any(|f| matches(f, e))) {
            let _ = tx.try_send(PoolMessage {
                relay: "memory".to_string(),
                message: RelayMessage::Event {
                    subscription_id: "sub".to_string(),
                    event: event.clone(),
                },
            });
        }
        let _ = tx.try_send(PoolMessage {
            relay: "memory".to_string(),
            message: RelayMessage::Eose("sub".to_string()),
        });
        Ok(rx)
    }

    async fn query(&self, filters: Vec<Filter>) -> Result<Vec<RawEvent>, RelayError> {
        Ok(self
            .stored
            .iter()
            .filter(|e| filters.iter().any(|f| matches(f, e)))
            .cloned()
            .collect())
    }

    async fn publish(&self, event: &RawEvent) -> Result<Vec<PublishOutcome>, RelayError> {
        self.published.lock().unwrap().push(event.clone());
        Ok(vec![PublishOutcome {
            relay: "memory".to_string(),
            accepted: true,
            message: String::new(),
        }])
    }
}

fn directive_fields(signer: &str) -> DirectiveFields {
    DirectiveFields {
        pubkey: signer.to_string(),
        version: "1.2.3".to_string(),
        hash: "abc123def456".to_string(),
        network: "hqz".to_string(),
        action: Action::Upgrade,
        content: "Scheduled upgrade to version 1.2.3".to_string(),
        genesis_url: None,
        required_by: None,
    }
}

fn directive(signer: &str, created_at: u64) -> RawEvent {
    build_directive(&directive_fields(signer), created_at)
        .unwrap()
        .into_signed(String::new())
}

fn profile(pubkey: &str, name: &str) -> RawEvent {
    RawEvent {
        id: format!("profile-{}", name),
        pubkey: pubkey.to_string(),
        created_at: 1,
        kind: METADATA_KIND,
        tags: vec![],
        content: format!(r#"{{"name":"{}"}}"#, name),
        sig: String::new(),
    }
}

async fn context(stored: Vec<RawEvent>) -> Arc<AppContext> {
    let mut config = Config::default();
    config.signal.authorized_pubkeys = vec![A.to_string(), B.to_string()];
    config.relays.special_relays = vec!["ws://localhost:3334".to_string()];

    let router = Arc::new(RelayRouter::new(
        config.relays.public_relays.clone(),
        config.relays.special_relays.clone(),
    ));
    let log = Arc::new(MemoryLog {
        stored,
        ..MemoryLog::default()
    });
    let ctx = Arc::new(AppContext::with_log(config, router, log));
    ctx.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while ctx.feed.is_bootstrapping().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    ctx
}

#[tokio::test]
async fn test_plan_and_view() {
    let t = now();
    let ctx = context(vec![directive(A, t - 100)]).await;

    let Json(plan) = routes::api_plan(State(ctx.clone())).await;
    assert!(plan.is_active);
    assert_eq!(plan.signed_pubkeys, [A]);
    assert_eq!(plan.pending_pubkeys, [B]);

    let Json(view) = routes::api_view(State(ctx.clone())).await;
    assert_eq!(view.len(), 1);
    assert_eq!(view[A].version, "1.2.3");

    let Json(status) = routes::api_status(State(ctx)).await;
    assert_eq!(status.feed.signals, 1);
    assert!(status.plan_active);
}

#[tokio::test]
async fn test_signals_limit() {
    let ctx = context(vec![directive(A, 100), directive(B, 200)]).await;

    let Json(all) = routes::api_signals(State(ctx.clone()), Query(ListQuery::default())).await;
    assert_eq!(all.len(), 2);
    // Newest insertion first
    assert_eq!(all[0].pubkey, B);

    let Json(one) = routes::api_signals(State(ctx), Query(ListQuery { limit: Some(1) })).await;
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn test_build_directive_endpoint() {
    let Json(built) = routes::api_build_directive(Json(directive_fields(A)))
        .await
        .unwrap();
    assert_eq!(built.id, built.event.event_id());
    assert_eq!(built.event.tags[0], ["d", "hyperqube"]);

    let mut bad = directive_fields(A);
    bad.hash = "NOT-HEX".to_string();
    let err = routes::api_build_directive(Json(bad)).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ValidationError::InvalidAttribute { .. })));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_publish_endpoint() {
    let ctx = context(vec![]).await;

    let mut tampered = directive(A, now());
    tampered.content = "changed".to_string();
    let err = routes::api_publish(State(ctx.clone()), Json(tampered))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::IdMismatch { .. }));

    let event = directive(A, now());
    let Json(response) = routes::api_publish(State(ctx.clone()), Json(event.clone()))
        .await
        .unwrap();
    assert_eq!(response.id, event.id);
    assert!(response.outcomes[0].accepted);
    assert_eq!(ctx.feed.signals().await[0].id, event.id);
}

#[tokio::test]
async fn test_relay_management() {
    let ctx = context(vec![]).await;
    let request = || RelayRequest {
        url: "wss://fleet.example.com".to_string(),
    };

    assert_eq!(
        routes::api_add_relay(State(ctx.clone()), Json(request())).await.unwrap(),
        StatusCode::CREATED
    );
    let err = routes::api_add_relay(State(ctx.clone()), Json(request()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

    let Json(relays) = routes::api_relays(State(ctx.clone())).await;
    assert_eq!(relays.user, ["wss://fleet.example.com"]);

    assert_eq!(
        routes::api_remove_relay(State(ctx.clone()), Json(request())).await.unwrap(),
        StatusCode::NO_CONTENT
    );
    let err = routes::api_remove_relay(State(ctx), Json(request()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_profiles_from_log() {
    let ctx = context(vec![profile(A, "ops-lead")]).await;
    ctx.warm_profiles().await;

    assert_eq!(ctx.profiles.author_for(A).name, "ops-lead");
    assert_eq!(ctx.profiles.author_for(B).name, "...11dc89");

    let fetched = ctx.profiles.fetch_profile(ctx.log.as_ref(), A).await.unwrap();
    assert_eq!(fetched.and_then(|p| p.name).as_deref(), Some("ops-lead"));
    assert!(ctx.profiles.fetch_profile(ctx.log.as_ref(), B).await.unwrap().is_none());
}
