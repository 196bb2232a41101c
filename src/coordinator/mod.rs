//! Trigger and status server
//!
//! This module exposes the broadcast gate over HTTP for external pingers,
//! operators and monitoring, and optionally hosts the internal scheduler loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             Coordinator Server           │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │      Rate-limit middleware         │  │
//! │  │  - burst / minute / hour windows   │  │
//! │  │  - per-endpoint rules              │  │
//! │  │  - GET-only fallback               │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │            REST API                │  │
//! │  │  POST /api/manual_broadcast        │  │
//! │  │  ANY  /wake                        │  │
//! │  │  GET  /api/broadcast_status        │  │
//! │  │  GET  /api/scheduler_status        │  │
//! │  │  GET  /health                      │  │
//! │  │  GET  /metrics                     │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  background: client sweep, scheduler     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dawnbell::coordinator::{CoordinatorServer, ServerConfig};
//!
//! let server = CoordinatorServer::new(ServerConfig::default(), gate)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod config;
pub mod middleware;
pub mod server;

// Re-export main types
pub use api::{TriggerRequest, TriggerResponse, ADMIN_SECRET_HEADER};
pub use config::{ConfigError, ServerConfig};
pub use server::{AppState, CoordinatorServer, ServerError, ServerInfo};
