//! Service wiring
//!
//! One [`AppContext`] per process holds every shared component. Nothing is
//! global; tests build a context around an in-memory [`EventLog`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api;
use crate::config::Config;
use crate::feed::{spawn_ingest_task, Feed};
use crate::plan::{spawn_plan_task, PlanEngine};
use crate::profile::ProfileCache;
use crate::record::{ACK_KIND, DIRECTIVE_KIND};
use crate::relay::{ConnectionConfig, EventLog, Filter, RelayError, RelayPool, RelayRouter};

pub struct AppContext {
    pub config: Config,
    pub profiles: Arc<ProfileCache>,
    pub feed: Arc<Feed>,
    pub engine: Arc<PlanEngine>,
    pub router: Arc<RelayRouter>,
    pub log: Arc<dyn EventLog>,
    shutdown: broadcast::Sender<()>,
}

impl AppContext {
    /// Context backed by the configured relays
    pub fn new(config: Config) -> Self {
        let router = Arc::new(RelayRouter::new(
            config.relays.public_relays.clone(),
            config.relays.special_relays.clone(),
        ));
        let pool = RelayPool::new(router.clone(), ConnectionConfig::from(&config.relays));
        Self::with_log(config, router, Arc::new(pool))
    }

    /// Context around any event log
    pub fn with_log(config: Config, router: Arc<RelayRouter>, log: Arc<dyn EventLog>) -> Self {
        let profiles = Arc::new(ProfileCache::new());
        let feed = Arc::new(Feed::new(profiles.clone()));
        let engine = Arc::new(PlanEngine::new(
            feed.clone(),
            config.signal.authorized(),
            config.signal.inactivity_timeout_secs,
        ));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            config,
            profiles,
            feed,
            engine,
            router,
            log,
            shutdown,
        }
    }

    /// Directives and acknowledgements, newest first
    pub fn feed_filters(&self) -> Vec<Filter> {
        vec![Filter::new()
            .kinds([DIRECTIVE_KIND, ACK_KIND])
            .limit(self.config.feed.limit)]
    }

    /// Subscribe to the feed and start the ingest and plan tasks
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, RelayError> {
        let rx = self.log.subscribe(self.feed_filters(), &self.shutdown).await?;
        let grace = Duration::from_millis(self.config.relays.bootstrap_grace_ms);

        let ingest = spawn_ingest_task(self.feed.clone(), rx, grace);
        let plan = spawn_plan_task(
            self.engine.clone(),
            self.config.signal.tick_interval(),
            self.shutdown.subscribe(),
        );

        Ok(vec![ingest, plan])
    }

    /// Load display names for every authorized signer
    pub async fn warm_profiles(&self) {
        let signers = self.engine.authorized().as_slice().to_vec();
        match self.profiles.fetch_profiles(self.log.as_ref(), &signers).await {
            Ok(added) => info!(added, "Signer profiles loaded"),
            Err(e) => warn!(error = %e, "Failed to load signer profiles"),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Run the service until ctrl-c
pub async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let handles = ctx.start().await?;

    let profiles_ctx = ctx.clone();
    tokio::spawn(async move {
        profiles_ctx.warm_profiles().await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.api.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on http://{}", addr);

    let app = api::create_router(ctx.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    ctx.shutdown();
    for handle in handles {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            warn!(error = %e, "Background task did not stop in time");
        }
    }

    info!("hypersignal stopped");
    Ok(())
}
