//! # Gateway Telemetry
//!
//! Observability for the campus API gateway.
//!
//! This crate provides:
//! - Structured logging setup on `tracing-subscriber`
//! - Per-service request metrics with a Prometheus mirror

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

// Re-export main types
pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsError, ServiceMetrics};
