//! REST API handlers for the trigger/status server
//!
//! This module defines the API routes and handlers. Every matched route runs
//! through the rate-limit middleware first; authentication on the trigger
//! endpoint happens afterwards.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::metrics;
use crate::models::{BroadcastType, ReservationId};
use crate::scheduler::{NextWindow, SchedulerStatus, TickOutcome, TriggerSource};

use super::middleware::rate_limit;
use super::server::AppState;

/// Header carrying the shared admin secret
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

// ============================================================================
// API Request / Response Types
// ============================================================================

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Body of `POST /api/manual_broadcast`; an empty body means a manual send
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerRequest {
    pub topic: Option<String>,

    /// Manual identity; defaults to the current local hour
    pub identity: Option<String>,

    /// Run the window scheduler instead of a manual send
    #[serde(alias = "auto_schedule")]
    pub auto_schedule: bool,

    /// Classify only
    #[serde(alias = "test_mode")]
    pub test_mode: bool,
}

impl TriggerRequest {
    /// Parse a request body, treating a blank body as all defaults
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
    }
}

/// Result of a trigger call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_type: Option<BroadcastType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    pub sent_count: u32,
    pub failed_count: u32,
    pub already_sent: bool,
    pub test_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
    pub timestamp: DateTime<Utc>,
}

impl TriggerResponse {
    pub fn from_outcome(outcome: &TickOutcome, window: Option<String>) -> Self {
        let window = match outcome {
            TickOutcome::TestMode { window, .. } => Some(window.clone()),
            _ => window,
        };

        Self {
            success: outcome.success(),
            outcome: outcome.label().to_string(),
            message: outcome.message(),
            broadcast_type: outcome.slot().map(|s| s.broadcast_type),
            window,
            sent_count: outcome.sent_count(),
            failed_count: outcome.failed_count(),
            already_sent: outcome.already_sent(),
            test_mode: matches!(outcome, TickOutcome::TestMode { .. }),
            reservation_id: outcome.reservation_id(),
            timestamp: Utc::now(),
        }
    }

    /// HTTP status for an outcome
    pub fn status_code(outcome: &TickOutcome) -> StatusCode {
        match outcome {
            TickOutcome::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TickOutcome::ExecutorFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

/// Liveness ping response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeResponse {
    pub status: String,
    pub window: String,
    pub local_time: DateTime<FixedOffset>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterSummary {
    pub available: bool,
    pub tracked_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct PoolSummary {
    pub size: usize,
    pub available: usize,
}

/// Read-only coordination status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatusResponse {
    pub window: String,
    pub local_time: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_window: Option<NextWindow>,
    /// `null` when the ledger could not be read
    pub reservations: BTreeMap<&'static str, Option<bool>>,
    pub rate_limiter: RateLimiterSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSummary>,
    pub scheduler: SchedulerStatus,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Trigger endpoints
        .route("/api/manual_broadcast", post(manual_broadcast))
        .route("/wake", get(wake).post(wake))
        // Status endpoints
        .route("/api/broadcast_status", get(broadcast_status))
        .route("/api/scheduler_status", get(scheduler_status))
        // Health endpoints
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit,
        ))
        .with_state(state)
}

// ============================================================================
// Trigger Handlers
// ============================================================================

/// Compare the presented secret against the configured one
///
/// Both sides are hashed first so the comparison length never depends on input.
pub fn admin_authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(provided) = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    bool::from(expected.as_slice().ct_eq(provided.as_slice()))
}

/// Manual override, auto-schedule tick or dry run
async fn manual_broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !admin_authorized(state.config.admin_secret.as_deref(), &headers) {
        tracing::warn!("Trigger rejected: missing or wrong admin secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Unauthorized - X-Admin-Secret header required",
                "status": "denied",
            })),
        )
            .into_response();
    }

    let request = match TriggerRequest::from_body(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("Invalid request body: {e}"))),
            )
                .into_response();
        }
    };

    let now = Utc::now();
    let window = state.gate.schedule().classify(now).label().to_string();

    let outcome = if request.test_mode {
        state.gate.preview_at(now, request.auto_schedule)
    } else if request.auto_schedule {
        state
            .gate
            .tick_at(now, TriggerSource::ExternalTrigger, request.topic)
            .await
    } else {
        tracing::info!(identity = ?request.identity, "Manual broadcast requested");
        state
            .gate
            .manual_at(now, request.identity, request.topic, TriggerSource::ManualApi)
            .await
    };

    let status = TriggerResponse::status_code(&outcome);
    (
        status,
        Json(TriggerResponse::from_outcome(&outcome, Some(window))),
    )
        .into_response()
}

/// Keep-alive ping; never touches the gate
async fn wake(State(state): State<AppState>) -> Json<WakeResponse> {
    let now = Utc::now();
    let schedule = state.gate.schedule();

    Json(WakeResponse {
        status: "awake".to_string(),
        window: schedule.classify(now).label().to_string(),
        local_time: schedule.local(now),
        timestamp: now,
    })
}

// ============================================================================
// Status Handlers
// ============================================================================

async fn broadcast_status(State(state): State<AppState>) -> Json<BroadcastStatusResponse> {
    let status = state.gate.status_at(Utc::now()).await;

    let reservations = status
        .reservations
        .iter()
        .map(|(t, sent)| (t.as_str(), *sent))
        .collect();

    let rate_limiter = match &state.rate_limiter {
        Some(limiter) => RateLimiterSummary {
            available: limiter.is_available(),
            tracked_clients: limiter.tracked_clients(),
        },
        None => RateLimiterSummary {
            available: false,
            tracked_clients: 0,
        },
    };

    let pool = state.database.as_ref().map(|db| {
        let pool = db.status();
        PoolSummary {
            size: pool.size,
            available: pool.available,
        }
    });

    Json(BroadcastStatusResponse {
        window: status.window.label().to_string(),
        local_time: status.local_time,
        next_window: status.next_window,
        reservations,
        rate_limiter,
        pool,
        scheduler: state.scheduler.status().await,
    })
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus text exposition
async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
