//! # Gateway Config
//!
//! Configuration for the campus API gateway.
//!
//! Configuration is read from a YAML, TOML or JSON file, overlaid with
//! `GATEWAY_*` environment variables and validated before the gateway starts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    AuthSettings, CacheSettings, CircuitBreakerSettings, GatewayConfig, HealthSettings,
    LoggingSettings, MetricsSettings, RateLimitSettings, RouteConfig, ServerSettings,
};
pub use error::ConfigError;
pub use loader::{apply_env_overrides, ConfigFormat, ConfigLoader};
