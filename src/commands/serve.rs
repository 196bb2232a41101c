use std::sync::Arc;

use anyhow::{Context, Result};

use dawnbell::config::Config;
use dawnbell::coordinator::CoordinatorServer;
use dawnbell::metrics;
use dawnbell::ratelimit::RateLimiter;
use dawnbell::scheduler::BroadcastScheduler;

use super::build_components;

/// Parameters for the serve command
#[derive(Debug, Clone, Default)]
pub struct ServeParams {
    /// Override for `server.bind_address`
    pub bind: Option<String>,

    /// Force the internal scheduler loop on
    pub internal_scheduler: bool,
}

/// Start the trigger/status server
pub async fn serve(config: Config, params: ServeParams) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(bind) = params.bind {
        server_config.bind_address = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {bind}"))?;
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Failed to initialize metrics: {}", e);
    }

    let components = build_components(&config)?;
    if let Some(database) = &components.database {
        database
            .init_schema()
            .await
            .context("Failed to prepare reservation schema")?;
    }

    let run_scheduler = params.internal_scheduler || config.schedule.enable_internal_scheduler;
    let scheduler = BroadcastScheduler::new(Arc::clone(&components.gate))
        .with_check_interval(config.schedule.check_interval())?;
    let limiter = RateLimiter::from_config(&config.rate_limit);

    let mut server = CoordinatorServer::new(server_config, components.gate)
        .context("Failed to create server")?
        .with_rate_limiter(Some(Arc::new(limiter)))
        .with_scheduler(Arc::new(scheduler), run_scheduler)
        .with_sweep_interval(config.rate_limit.sweep_interval())?;
    if let Some(database) = components.database {
        server = server.with_database(database);
    }

    let info = server.info();
    println!("{}", info.display());
    println!();
    println!("API Endpoints:");
    println!("  POST /api/manual_broadcast  - Manual, auto-schedule or test trigger");
    println!("  ANY  /wake                  - Keep-alive ping");
    println!("  GET  /api/broadcast_status  - Window and today's reservations");
    println!("  GET  /api/scheduler_status  - Internal scheduler loop");
    println!("  GET  /health                - Health check");
    println!("  GET  /metrics               - Prometheus metrics endpoint");
    println!();
    println!("Listening on http://{}", info.bind_address);
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Server stopped.");
    Ok(())
}
