//! # Gateway Core
//!
//! Core types and error handling for the campus API gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Service routes and backend instances
//! - The request/response pair passed through the dispatch pipeline
//! - The gateway error taxonomy and its HTTP mapping
//! - The JSON response envelope

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types
pub use error::{GatewayError, GatewayResult};
pub use request::GatewayRequest;
pub use response::{ApiResponse, GatewayResponse};
pub use types::{
    HealthStatus, LoadBalancingStrategy, RateLimitStrategy, ServiceInstance, ServiceRoute,
};
