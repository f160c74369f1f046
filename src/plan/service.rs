//! Plan engine service - recomputes the plan when the feed changes or time passes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{derive_plan, latest_directive_view, now, AuthorizedSigners, LatestDirectiveView, SignalPlan};
use crate::feed::Feed;

/// Tick period when none is configured: a tenth of the timeout, at least one second
pub fn default_tick_interval(timeout_secs: u64) -> Duration {
    Duration::from_secs((timeout_secs / 10).max(1))
}

pub struct PlanEngine {
    feed: Arc<Feed>,
    authorized: AuthorizedSigners,
    timeout_secs: u64,
    plan_tx: watch::Sender<SignalPlan>,
    /// Orders snapshot-and-publish so an older snapshot never overwrites a newer plan
    publish_lock: Mutex<()>,
}

impl PlanEngine {
    pub fn new(feed: Arc<Feed>, authorized: AuthorizedSigners, timeout_secs: u64) -> Self {
        let (plan_tx, _) = watch::channel(SignalPlan::inactive(&authorized));
        Self {
            feed,
            authorized,
            timeout_secs,
            plan_tx,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn authorized(&self) -> &AuthorizedSigners {
        &self.authorized
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn feed(&self) -> &Arc<Feed> {
        &self.feed
    }

    pub async fn latest_view(&self) -> LatestDirectiveView {
        let signals = self.feed.signals().await;
        latest_directive_view(&signals, &self.authorized)
    }

    /// Derive the plan as of `now` and publish it if it changed
    pub async fn recompute_at(&self, now: u64) -> SignalPlan {
        let _guard = self.publish_lock.lock().await;
        let view = self.latest_view().await;
        let plan = derive_plan(&view, &self.authorized, now, self.timeout_secs);

        let changed = self.plan_tx.send_if_modified(|current| {
            if *current == plan {
                return false;
            }
            *current = plan.clone();
            true
        });

        if changed {
            info!(
                action = plan.action.as_deref().unwrap_or("none"),
                active = plan.is_active,
                signed = plan.signed_pubkeys.len(),
                pending = plan.pending_pubkeys.len(),
                "Signal plan changed"
            );
        }

        plan
    }

    pub async fn recompute(&self) -> SignalPlan {
        self.recompute_at(now()).await
    }

    /// Last published plan
    pub fn current(&self) -> SignalPlan {
        self.plan_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SignalPlan> {
        self.plan_tx.subscribe()
    }
}

/// Recompute on every feed revision and on each tick until shutdown
pub fn spawn_plan_task(
    engine: Arc<PlanEngine>,
    tick: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut revisions = engine.feed.subscribe();
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(tick_secs = tick.as_secs(), "Plan engine started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Plan engine shutting down");
                    break;
                }

                changed = revisions.changed() => {
                    if changed.is_err() {
                        info!("Feed dropped, plan engine stopping");
                        break;
                    }
                    debug!(revision = *revisions.borrow(), "Feed changed");
                    engine.recompute().await;
                }

                _ = ticker.tick() => {
                    engine.recompute().await;
                }
            }
        }

        info!("Plan engine stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileCache;
    use crate::record::{build_directive, Action, DirectiveFields};

    const SIGNER: &str = "2bad9b3fdb7a3bd2dc6cd4b7bf2e9b57a0b2fb7f9ac5e8b1a08aa0a5e5e5f1c4";

    fn upgrade(created_at: u64) -> crate::record::RawEvent {
        let fields = DirectiveFields {
            pubkey: SIGNER.to_string(),
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

    fn engine() -> PlanEngine {
        let feed = Arc::new(Feed::new(Arc::new(ProfileCache::new())));
        PlanEngine::new(feed, AuthorizedSigners::new([SIGNER]), 3600)
    }

    #[test]
    fn test_default_tick_interval() {
        assert_eq!(default_tick_interval(3600), Duration::from_secs(360));
        assert_eq!(default_tick_interval(5), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_recompute_publishes_changes() {
        let engine = engine();
        let mut rx = engine.subscribe();
        assert!(!engine.current().is_active);

        engine.feed().ingest(&upgrade(1000)).await;
        let plan = engine.recompute_at(1200).await;
        assert!(plan.is_active);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().action.as_deref(), Some("upgrade"));
        assert_eq!(engine.current(), plan);
    }

    #[tokio::test]
    async fn test_recompute_expires_over_time() {
        let engine = engine();
        engine.feed().ingest(&upgrade(1000)).await;

        assert!(engine.recompute_at(1000).await.is_active);
        assert!(!engine.recompute_at(1000 + 3601).await.is_active);
        assert!(!engine.current().is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recompute_publishes_final_feed() {
        let engine = Arc::new(engine());
        let at = 10_000;

        for round in 0..50u64 {
            let mut tasks = Vec::new();
            for i in 0..20u64 {
                let ingesting = engine.clone();
                let created_at = at - 2_000 + round * 20 + i;
                tasks.push(tokio::spawn(async move {
                    ingesting.feed().ingest(&upgrade(created_at)).await;
                    ingesting.recompute_at(at).await;
                }));

                let reading = engine.clone();
                tasks.push(tokio::spawn(async move {
                    reading.recompute_at(at).await;
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            let expected = derive_plan(
                &engine.latest_view().await,
                engine.authorized(),
                at,
                engine.timeout_secs(),
            );
            assert_eq!(engine.current(), expected, "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_plan_task_reacts_to_feed() {
        let engine = Arc::new(engine());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut plans = engine.subscribe();
        let handle = spawn_plan_task(engine.clone(), Duration::from_secs(60), shutdown_rx);

        engine.feed().ingest(&upgrade(now())).await;
        tokio::time::timeout(Duration::from_secs(2), plans.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(engine.current().is_active);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
