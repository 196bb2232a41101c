//! Trigger/status server implementation
//!
//! This module provides the main server that wires the broadcast gate,
//! rate limiter and internal scheduler behind the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::scheduler::{BroadcastGate, BroadcastScheduler};
use crate::storage::Database;

use super::api::create_router;
use super::config::ServerConfig;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Double-gated broadcast execution
    pub gate: Arc<BroadcastGate>,

    /// Internal scheduler loop (may not be running)
    pub scheduler: Arc<BroadcastScheduler>,

    /// Request admission; `None` until initialized
    pub rate_limiter: Option<Arc<RateLimiter>>,

    /// Coordination store, when PostgreSQL-backed
    pub database: Option<Database>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: ServerConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main HTTP server
pub struct CoordinatorServer {
    config: ServerConfig,
    state: AppState,
    run_internal_scheduler: bool,
    sweep_interval: Duration,
}

impl CoordinatorServer {
    /// Create a new server around a gate
    pub fn new(config: ServerConfig, gate: Arc<BroadcastGate>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let scheduler = Arc::new(BroadcastScheduler::new(Arc::clone(&gate)));

        let state = AppState {
            gate,
            scheduler,
            rate_limiter: Some(Arc::new(RateLimiter::from_config(
                &RateLimitConfig::default(),
            ))),
            database: None,
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self {
            config,
            state,
            run_internal_scheduler: false,
            sweep_interval: Duration::from_secs(300),
        })
    }

    /// Replace the rate limiter; `None` leaves admission to the fallback policy
    pub fn with_rate_limiter(mut self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.state.rate_limiter = limiter;
        self
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.state.database = Some(database);
        self
    }

    /// Use a pre-built scheduler loop and decide whether to run it
    pub fn with_scheduler(mut self, scheduler: Arc<BroadcastScheduler>, run: bool) -> Self {
        self.state.scheduler = scheduler;
        self.run_internal_scheduler = run;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Result<Self, ServerError> {
        if interval.is_zero() {
            return Err(ServerError::ConfigError(
                "sweep interval must be greater than 0".to_string(),
            ));
        }
        self.sweep_interval = interval;
        Ok(self)
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!("Starting dawnbell server on {} (with graceful shutdown)", addr);

        self.start_background_tasks();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServerError::ServeError(e.to_string()))?;

        self.state.scheduler.stop().await;
        tracing::info!("dawnbell server shutdown complete");
        Ok(())
    }

    /// Start background tasks
    fn start_background_tasks(&self) {
        // Inactive-client sweep for the rate limiter
        if let Some(limiter) = self.state.rate_limiter.clone() {
            let period = self.sweep_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // First tick completes immediately
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = limiter.sweep_inactive() {
                        Error::from(e).report("rate_limit_sweep");
                    }
                }
            });
        }

        if self.run_internal_scheduler {
            let scheduler = Arc::clone(&self.state.scheduler);
            tokio::spawn(async move {
                if let Err(e) = scheduler.start().await {
                    Error::from(e).report("scheduler_loop");
                }
            });
        }

        tracing::info!(
            internal_scheduler = self.run_internal_scheduler,
            "Background tasks started"
        );
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            lock_backend: self.state.gate.locks().backend_name(),
            ledger_backend: self.state.gate.ledger().backend_name(),
            executor: self.state.gate.executor_name().to_string(),
            internal_scheduler: self.run_internal_scheduler,
            admin_auth: self.config.admin_secret.is_some(),
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub lock_backend: &'static str,
    pub ledger_backend: &'static str,
    pub executor: String,
    pub internal_scheduler: bool,
    pub admin_auth: bool,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let on_off = |flag: bool| if flag { "enabled" } else { "disabled" };
        format!(
            "dawnbell Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Lock Backend: {}\n\
             Ledger Backend: {}\n\
             Executor: {}\n\
             Internal Scheduler: {}\n\
             Admin Auth: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.lock_backend,
            self.ledger_backend,
            self.executor,
            on_off(self.internal_scheduler),
            on_off(self.admin_auth),
            on_off(self.cors_enabled),
            on_off(self.request_logging_enabled)
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DisabledExecutor;
    use crate::lock::MemoryLockManager;
    use crate::ratelimit::RateLimitRule;
    use crate::scheduler::WindowSchedule;
    use crate::storage::InMemoryReservationLedger;

    fn gate() -> Arc<BroadcastGate> {
        Arc::new(BroadcastGate::new(
            Arc::new(MemoryLockManager::new()),
            Arc::new(InMemoryReservationLedger::new()),
            Arc::new(DisabledExecutor),
            WindowSchedule::with_defaults(),
        ))
    }

    #[test]
    fn test_server_creation() {
        let server = CoordinatorServer::new(ServerConfig::default(), gate());
        assert!(server.is_ok());
    }

    #[test]
    fn test_server_info() {
        let server = CoordinatorServer::new(ServerConfig::default(), gate()).unwrap();
        let info = server.info();

        assert_eq!(info.lock_backend, "memory");
        assert_eq!(info.executor, "disabled");
        assert!(info.cors_enabled);
        assert!(!info.internal_scheduler);
        assert!(info.display().contains("Ledger Backend: memory"));
    }

    #[test]
    fn test_default_limiter_applies_endpoint_rules() {
        let server = CoordinatorServer::new(ServerConfig::default(), gate()).unwrap();
        let limiter = server.state().rate_limiter.clone().unwrap();

        assert_eq!(
            limiter.rule_for("/api/manual_broadcast"),
            RateLimitRule::admin()
        );
        assert_eq!(
            limiter.rule_for("/api/scheduler_status"),
            RateLimitRule::scheduler()
        );
        assert_eq!(limiter.rule_for("/wake"), RateLimitRule::default());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let server = CoordinatorServer::new(ServerConfig::default(), gate()).unwrap();
        assert!(server.with_sweep_interval(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_app_state_components() {
        let server = CoordinatorServer::new(ServerConfig::default(), gate())
            .unwrap()
            .with_rate_limiter(None);
        let state = server.state();

        assert!(state.rate_limiter.is_none());
        assert!(state.database.is_none());
        assert!(!state.scheduler.is_running().await);
    }
}
