//! Per-client request admission control
//!
//! Each client carries three sliding windows of request timestamps
//! (burst 10s, minute 60s, hour 3600s). A request is rejected at the first
//! window, in that order, whose count already meets its limit; otherwise its
//! timestamp is appended to all three. State is process-local and guarded by
//! a single mutex around each read-modify-write.
//!
//! Endpoint rules are matched by substring against the request path, in
//! insertion order, and fall back to the default rule.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DawnbellErrorTrait, ErrorCategory};

/// Limits for one endpoint class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Maximum requests per 10 seconds
    pub burst_limit: u32,
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            burst_limit: 10,
            per_minute: 60,
            per_hour: 1000,
        }
    }
}

impl RateLimitRule {
    pub fn new(burst_limit: u32, per_minute: u32, per_hour: u32) -> Self {
        Self {
            burst_limit,
            per_minute,
            per_hour,
        }
    }

    /// Mutating administrative endpoints
    pub fn admin() -> Self {
        Self::new(3, 10, 100)
    }

    pub fn scheduler() -> Self {
        Self::new(5, 20, 200)
    }

    pub fn webhook() -> Self {
        Self::new(20, 120, 2000)
    }

    fn limit(&self, window: LimitWindow) -> u32 {
        match window {
            LimitWindow::Burst => self.burst_limit,
            LimitWindow::Minute => self.per_minute,
            LimitWindow::Hour => self.per_hour,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.burst_limit == 0 || self.per_minute == 0 || self.per_hour == 0 {
            return Err("rate limits must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Rule applied to paths containing `pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    pub pattern: String,
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

impl EndpointRule {
    pub fn new(pattern: impl Into<String>, rule: RateLimitRule) -> Self {
        Self {
            pattern: pattern.into(),
            rule,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_rule: RateLimitRule,
    pub endpoint_rules: Vec<EndpointRule>,
    /// Seconds between inactive-client sweeps
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rule: RateLimitRule::default(),
            endpoint_rules: vec![
                EndpointRule::new("/api/manual_broadcast", RateLimitRule::admin()),
                EndpointRule::new("/api/scheduler", RateLimitRule::scheduler()),
                EndpointRule::new("/webhook", RateLimitRule::webhook()),
            ],
            sweep_interval_secs: 300,
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.default_rule
            .validate()
            .map_err(|e| format!("default rule: {e}"))?;
        for endpoint in &self.endpoint_rules {
            if endpoint.pattern.is_empty() {
                return Err("endpoint rule pattern cannot be empty".to_string());
            }
            endpoint
                .rule
                .validate()
                .map_err(|e| format!("rule for {}: {e}", endpoint.pattern))?;
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// The three tracked windows, in check order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Burst,
    Minute,
    Hour,
}

impl LimitWindow {
    pub const ALL: [LimitWindow; 3] = [Self::Burst, Self::Minute, Self::Hour];

    pub fn span(&self) -> Duration {
        match self {
            Self::Burst => Duration::from_secs(10),
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Burst => "burst",
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Burst => 0,
            Self::Minute => 1,
            Self::Hour => 2,
        }
    }
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited {
        window: LimitWindow,
        limit: u32,
        /// Time until the oldest entry in `window` ages out
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Rejection reason naming the window, if limited
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Allowed => None,
            Self::Limited { window, limit, .. } => Some(match window {
                LimitWindow::Burst => {
                    format!("Too many requests in short period. Limit: {limit} per 10 seconds")
                }
                LimitWindow::Minute => format!("Too many requests per minute. Limit: {limit}"),
                LimitWindow::Hour => format!("Too many requests per hour. Limit: {limit}"),
            }),
        }
    }
}

/// Limiter state could not be consulted
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limiter state unavailable: {0}")]
    Unavailable(String),
}

impl DawnbellErrorTrait for RateLimitError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::RateLimit
    }
}

/// Admission decision when no limiter state is available
///
/// Read-only methods pass, anything that may mutate is denied.
pub fn fallback_admission(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS")
}

#[derive(Debug, Default)]
struct ClientWindows {
    windows: [VecDeque<Instant>; 3],
}

impl ClientWindows {
    fn prune(&mut self, now: Instant) {
        for window in LimitWindow::ALL {
            let span = window.span();
            let entries = &mut self.windows[window.index()];
            while let Some(front) = entries.front() {
                if now.saturating_duration_since(*front) > span {
                    entries.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn last_seen(&self) -> Option<Instant> {
        self.windows[LimitWindow::Hour.index()].back().copied()
    }
}

/// In-memory sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    default_rule: RateLimitRule,
    endpoint_rules: Vec<EndpointRule>,
    clients: Mutex<HashMap<String, ClientWindows>>,
}

impl Default for RateLimiter {
    /// Default rule plus the stock endpoint overrides
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(default_rule: RateLimitRule) -> Self {
        Self {
            default_rule,
            endpoint_rules: Vec::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        config
            .endpoint_rules
            .iter()
            .fold(Self::new(config.default_rule), |limiter, endpoint| {
                limiter.with_endpoint_rule(endpoint.pattern.clone(), endpoint.rule)
            })
    }

    pub fn with_endpoint_rule(mut self, pattern: impl Into<String>, rule: RateLimitRule) -> Self {
        let pattern = pattern.into();
        tracing::debug!(
            pattern = %pattern,
            burst = rule.burst_limit,
            per_minute = rule.per_minute,
            per_hour = rule.per_hour,
            "Rate limit rule added"
        );
        self.endpoint_rules.push(EndpointRule::new(pattern, rule));
        self
    }

    /// First endpoint rule whose pattern occurs in `path`, else the default
    pub fn rule_for(&self, path: &str) -> RateLimitRule {
        self.endpoint_rules
            .iter()
            .find(|endpoint| path.contains(&endpoint.pattern))
            .map(|endpoint| endpoint.rule)
            .unwrap_or(self.default_rule)
    }

    pub fn admit(&self, client_id: &str, path: &str) -> Result<Admission, RateLimitError> {
        self.admit_at(client_id, path, Instant::now())
    }

    /// Admission check against an explicit clock reading
    pub fn admit_at(
        &self,
        client_id: &str,
        path: &str,
        now: Instant,
    ) -> Result<Admission, RateLimitError> {
        let rule = self.rule_for(path);
        let mut clients = self
            .clients
            .lock()
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;

        let state = clients.entry(client_id.to_string()).or_default();
        state.prune(now);

        for window in LimitWindow::ALL {
            let entries = &state.windows[window.index()];
            let limit = rule.limit(window);
            if entries.len() >= limit as usize {
                let retry_after = entries
                    .front()
                    .map(|oldest| window.span().saturating_sub(now.saturating_duration_since(*oldest)))
                    .unwrap_or_else(|| window.span());

                tracing::warn!(
                    client = client_id,
                    path,
                    window = window.as_str(),
                    count = entries.len(),
                    limit,
                    "Rate limit exceeded"
                );
                crate::metrics::record_rate_limit_rejection(window.as_str());

                return Ok(Admission::Limited {
                    window,
                    limit,
                    retry_after,
                });
            }
        }

        for entries in state.windows.iter_mut() {
            entries.push_back(now);
        }

        Ok(Admission::Allowed)
    }

    /// Drop clients with no request in the last hour; returns how many
    pub fn sweep_inactive(&self) -> Result<usize, RateLimitError> {
        self.sweep_inactive_at(Instant::now())
    }

    pub fn sweep_inactive_at(&self, now: Instant) -> Result<usize, RateLimitError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;

        let before = clients.len();
        clients.retain(|_, state| match state.last_seen() {
            Some(last) => now.saturating_duration_since(last) <= LimitWindow::Hour.span(),
            None => false,
        });
        let removed = before - clients.len();

        if removed > 0 {
            tracing::info!(removed, "Cleaned up inactive rate limit clients");
        }
        crate::metrics::set_tracked_clients(clients.len());

        Ok(removed)
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether the state can still be consulted
    pub fn is_available(&self) -> bool {
        !self.clients.is_poisoned()
    }
}

/// Best-effort client key: forwarded address plus a user-agent fingerprint
///
/// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// socket peer. Not an authentication mechanism.
pub fn client_identifier(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<SocketAddr>,
    user_agent: Option<&str>,
) -> String {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);

    let ip = forwarded
        .or_else(|| {
            real_ip
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let fingerprint = match user_agent.filter(|ua| !ua.is_empty()) {
        Some(ua) => {
            let digest = Sha256::digest(ua.as_bytes());
            digest[..4].iter().map(|b| format!("{b:02x}")).collect()
        }
        None => "none".to_string(),
    };

    format!("{ip}:{fingerprint}")
}
