//! Request admission middleware
//!
//! Runs on every matched route except health and metrics. Rejections on the
//! wake endpoint are logged and let through so the external pinger can always
//! keep the deployment warm.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Error;
use crate::metrics;
use crate::ratelimit::{client_identifier, fallback_admission, Admission};

use super::server::AppState;

/// Paths never rate limited
const EXEMPT_PATHS: &[&str] = &["/health", "/metrics"];

/// Paths where a rejection is only a warning
const LENIENT_PATHS: &[&str] = &["/wake"];

/// Body of a 429 response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedResponse {
    pub error: String,
    pub message: String,
    pub window: String,
    pub retry_after: u64,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Derive the rate-limit key for a request
pub fn request_client_id(request: &Request) -> String {
    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    client_identifier(
        header_str(headers, "x-forwarded-for"),
        header_str(headers, "x-real-ip"),
        peer,
        header_str(headers, "user-agent"),
    )
}

/// Rate-limit and record metrics for one request
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let path = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let client_id = request_client_id(&request);
    let method = request.method().as_str().to_string();

    let admission = match &state.rate_limiter {
        Some(limiter) => match limiter.admit(&client_id, &path) {
            Ok(admission) => Some(admission),
            Err(e) => {
                Error::from(e).report("rate_limit_admit");
                None
            }
        },
        None => None,
    };

    let response = match admission {
        Some(Admission::Allowed) => next.run(request).await,
        Some(limited @ Admission::Limited { .. }) if LENIENT_PATHS.contains(&path.as_str()) => {
            tracing::warn!(
                client = %client_id,
                path = %path,
                reason = %limited.reason().unwrap_or_default(),
                "Rate limit exceeded on lenient endpoint, serving anyway"
            );
            next.run(request).await
        }
        Some(limited) => rate_limited_response(&limited),
        None if fallback_admission(&method) => next.run(request).await,
        None => {
            tracing::warn!(client = %client_id, path = %path, method = %method, "Denying mutating request without rate limiter");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "Rate limiter unavailable",
                    "message": "Mutating requests are denied until admission control is available",
                })),
            )
                .into_response()
        }
    };

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn rate_limited_response(admission: &Admission) -> Response {
    let Admission::Limited {
        window,
        retry_after,
        ..
    } = admission
    else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    // Round up so clients never retry before the window frees
    let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let retry_secs = retry_secs.max(1);

    let body = RateLimitedResponse {
        error: "Rate limit exceeded".to_string(),
        message: admission.reason().unwrap_or_default(),
        window: window.as_str().to_string(),
        retry_after: retry_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimitWindow;
    use std::time::Duration;

    #[test]
    fn test_rate_limited_response_sets_retry_after() {
        let response = rate_limited_response(&Admission::Limited {
            window: LimitWindow::Burst,
            limit: 3,
            retry_after: Duration::from_millis(6200),
        });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[test]
    fn test_client_id_prefers_forwarded_header() {
        let request = axum::http::Request::builder()
            .uri("/wake")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();

        assert!(request_client_id(&request).starts_with("203.0.113.7:"));
    }
}
