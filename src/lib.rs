//! Portico - An edge API gateway with distributed admission control.
//!
//! Portico sits between untrusted clients and a set of upstream services.
//! Every request is authenticated, subjected to a distributed rate-limit
//! decision, routed to a healthy upstream endpoint and streamed back to the
//! caller. Multiple gateway instances converge on one admission decision per
//! key by evaluating the rate-limit algorithms as atomic Lua scripts on a
//! shared Redis store.
//!
//! # Features
//! - Distributed rate limiting (token bucket, leaky bucket, sliding window)
//!   executed server-side on the coordination store
//! - Health-aware load balancing: round-robin, least-connections and smooth
//!   weighted round-robin
//! - Streaming reverse proxy with hop-by-hop header hygiene
//! - Bearer authentication via preshared-secret JWT and/or OIDC ID tokens
//! - Prometheus metrics & structured tracing via `tracing`
//! - Graceful shutdown & per-upstream connection tracking
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{config, core::GatewayService, utils::ConnectionTracker};
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg = config::load_config()?;
//! let tracker = Arc::new(ConnectionTracker::new());
//! let gateway = Arc::new(GatewayService::new(&cfg.proxy, tracker)?);
//! // Wire this into the provided HttpHandler adapter (see binary crate).
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. The admission pipeline lives in
//! the `HttpHandler` adapter and is the sole writer of client responses; the
//! rate limiter scripts in `core::rate_limiter` are the correctness nucleus
//! and must stay atomic on the coordination store.
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error type.
//! Client-facing failures are converted to [`error::GatewayError`] at the
//! pipeline boundary and rendered as a JSON error envelope.
//!
//! # Concurrency & Data Structures
//! For shared mutable maps the project uses `scc::HashMap` to maintain
//! predictable performance characteristics under contention. Selector cursors
//! are either atomics or short critical sections held only for one pick.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HealthChecker, HttpClientAdapter, HttpHandler},
    core::GatewayService,
    error::GatewayError,
    ports::http_client::HttpClient,
    utils::{ConnectionTracker, GracefulShutdown},
};
