//! API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{mock, SharedState};
use crate::feed::{FeedStatus, IngestOutcome, ProcessedEvent};
use crate::plan::{now, LatestDirectiveView, SignalPlan};
use crate::record::{
    build_acknowledgement, build_directive, parse_record, AckFields, DirectiveFields, RawEvent,
    UnsignedEvent, ValidationError,
};
use crate::relay::{PublishOutcome, RelayError, RelayStatus};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Event id does not match its content (expected {expected})")]
    IdMismatch { expected: String },

    #[error("Invalid mock data: {0}")]
    MockData(ValidationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::IdMismatch { .. } => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::InvalidUrl { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::DuplicateRelay(_)) => StatusCode::CONFLICT,
            ApiError::Relay(RelayError::UnknownRelay(_)) => StatusCode::NOT_FOUND,
            ApiError::Relay(RelayError::NoSpecialRelays(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Relay(_) => StatusCode::BAD_GATEWAY,
            ApiError::MockData(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Plan ===

/// GET /api/plan
pub async fn api_plan(State(state): State<SharedState>) -> Json<SignalPlan> {
    Json(state.engine.recompute().await)
}

/// GET /api/view
pub async fn api_view(State(state): State<SharedState>) -> Json<LatestDirectiveView> {
    Json(state.engine.latest_view().await)
}

// === Feed ===

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

fn limited(events: Vec<ProcessedEvent>, query: &ListQuery) -> Vec<ProcessedEvent> {
    match query.limit {
        Some(limit) => events.into_iter().take(limit).collect(),
        None => events,
    }
}

/// GET /api/signals
pub async fn api_signals(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ProcessedEvent>> {
    Json(limited(state.feed.signals().await, &query))
}

/// GET /api/acks
pub async fn api_acks(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ProcessedEvent>> {
    Json(limited(state.feed.acks().await, &query))
}

/// GET /api/events - canned records for UI development
pub async fn api_mock_events() -> Result<Json<Vec<RawEvent>>, ApiError> {
    let events = mock::mock_events(now());
    for event in &events {
        if let Err(e) = parse_record(event) {
            warn!(event_id = %event.id, error = %e, "Mock data validation failed");
            return Err(ApiError::MockData(e));
        }
    }
    Ok(Json(events))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub feed: FeedStatus,
    pub plan_active: bool,
    pub authorized_signers: usize,
    pub inactivity_timeout_secs: u64,
    pub relays_connected: usize,
}

/// GET /api/status
pub async fn api_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        feed: state.feed.status().await,
        plan_active: state.engine.current().is_active,
        authorized_signers: state.engine.authorized().len(),
        inactivity_timeout_secs: state.engine.timeout_secs(),
        relays_connected: state.router.connected_count(),
    })
}

// === Relays ===

#[derive(Serialize)]
pub struct RelaysResponse {
    pub public: Vec<String>,
    pub special: Vec<String>,
    pub user: Vec<String>,
    pub statuses: Vec<RelayStatus>,
}

/// GET /api/relays
pub async fn api_relays(State(state): State<SharedState>) -> Json<RelaysResponse> {
    Json(RelaysResponse {
        public: state.router.public_relays().await,
        special: state.router.special_relays().await,
        user: state.router.user_relays().await,
        statuses: state.router.statuses(),
    })
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub url: String,
}

/// POST /api/relays - add a user relay. Takes effect on the next subscription.
pub async fn api_add_relay(
    State(state): State<SharedState>,
    Json(req): Json<RelayRequest>,
) -> Result<StatusCode, ApiError> {
    state.router.add_user_relay(&req.url).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/relays
pub async fn api_remove_relay(
    State(state): State<SharedState>,
    Json(req): Json<RelayRequest>,
) -> Result<StatusCode, ApiError> {
    state.router.remove_relay(&req.url).await?;
    Ok(StatusCode::NO_CONTENT)
}

// === Records ===

/// An unsigned record ready for external signing
#[derive(Debug, Serialize, Deserialize)]
pub struct UnsignedResponse {
    /// Id the record will carry once signed
    pub id: String,
    pub event: UnsignedEvent,
}

/// Run the full validator over a freshly built record
fn checked(event: UnsignedEvent) -> Result<Json<UnsignedResponse>, ApiError> {
    let id = event.event_id();
    let candidate = event.clone().into_signed(String::new());
    parse_record(&candidate)?;
    Ok(Json(UnsignedResponse { id, event }))
}

/// POST /api/directives
pub async fn api_build_directive(
    Json(fields): Json<DirectiveFields>,
) -> Result<Json<UnsignedResponse>, ApiError> {
    checked(build_directive(&fields, now())?)
}

/// POST /api/acks/build
pub async fn api_build_ack(
    Json(fields): Json<AckFields>,
) -> Result<Json<UnsignedResponse>, ApiError> {
    checked(build_acknowledgement(&fields, now())?)
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub id: String,
    pub outcomes: Vec<PublishOutcome>,
}

/// POST /api/publish - publish an externally signed record
pub async fn api_publish(
    State(state): State<SharedState>,
    Json(event): Json<RawEvent>,
) -> Result<Json<PublishResponse>, ApiError> {
    parse_record(&event)?;
    if !event.has_valid_id() {
        return Err(ApiError::IdMismatch {
            expected: event.unsigned().event_id(),
        });
    }

    let outcomes = state.log.publish(&event).await?;
    if outcomes.iter().any(|o| o.accepted) {
        if let IngestOutcome::Inserted(class) = state.feed.ingest(&event).await {
            info!(event_id = %event.id, class = class.label(), "Published record added to feed");
        }
    }

    Ok(Json(PublishResponse {
        id: event.id,
        outcomes,
    }))
}
