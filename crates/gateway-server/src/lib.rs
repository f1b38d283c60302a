//! # Gateway Server
//!
//! HTTP server and dispatch pipeline for the campus API gateway.
//!
//! This crate provides:
//! - Axum-based HTTP server with graceful shutdown
//! - The dispatch pipeline (auth, routing, rate limiting, caching, circuit
//!   breaking, load balancing, metrics)
//! - Bearer authentication and route role checks
//! - Backend health aggregation
//! - Health, metrics and admin endpoints

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod upstream;

// Re-export main types
pub use auth::{AuthConfig, AuthError, Authenticator, Principal};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use error::ApiError;
pub use health::{
    classify, ComponentHealth, HealthAggregator, HealthConfig, HealthResponse, InstanceHealth,
    LivenessResponse, ReadinessResponse,
};
pub use routes::create_router;
pub use server::{Server, ServerConfig};
pub use shutdown::shutdown_signal;
pub use state::{AppState, AppStateBuilder};
pub use upstream::{HttpUpstream, UpstreamClient, UpstreamError, UpstreamRequest};
