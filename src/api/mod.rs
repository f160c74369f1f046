//! HTTP API - plan, feed, relays and record builders
//!
//! Provides:
//! - The current signal plan and the latest directive per signer
//! - The signal and acknowledgement feeds
//! - Relay status and user relay management
//! - Unsigned directive / acknowledgement builders and a publish endpoint

pub mod mock;
pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::service::AppContext;

pub use routes::ApiError;

pub type SharedState = Arc<AppContext>;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // Plan
        .route("/api/plan", get(routes::api_plan))
        .route("/api/view", get(routes::api_view))
        // Feed
        .route("/api/signals", get(routes::api_signals))
        .route("/api/acks", get(routes::api_acks))
        .route("/api/events", get(routes::api_mock_events))
        .route("/api/status", get(routes::api_status))
        // Relays
        .route(
            "/api/relays",
            get(routes::api_relays)
                .post(routes::api_add_relay)
                .delete(routes::api_remove_relay),
        )
        // Records
        .route("/api/directives", post(routes::api_build_directive))
        .route("/api/acks/build", post(routes::api_build_ack))
        .route("/api/publish", post(routes::api_publish))
        // Health check
        .route("/health", get(routes::health))
        .with_state(state)
}
