//! Configuration data structures.

use crate::error::ConfigError;
use gateway_core::{LoadBalancingStrategy, RateLimitStrategy, ServiceInstance, ServiceRoute};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP server settings
    pub server: ServerSettings,
    /// Routed services, matched in order
    pub routes: Vec<RouteConfig>,
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerSettings,
    /// Response cache settings
    pub cache: CacheSettings,
    /// Rate limiter settings
    pub rate_limit: RateLimitSettings,
    /// Metrics settings
    pub metrics: MetricsSettings,
    /// Authentication settings
    pub auth: AuthSettings,
    /// Health polling settings
    pub health: HealthSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            routes: default_routes(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            metrics: MetricsSettings::default(),
            auth: AuthSettings::default(),
            health: HealthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// The six platform services on their development ports
fn default_routes() -> Vec<RouteConfig> {
    [
        ("auth", "/api/auth", 3001),
        ("users", "/api/users", 3002),
        ("courses", "/api/courses", 3003),
        ("planning", "/api/planning", 3004),
        ("news", "/api/news", 3005),
        ("statistics", "/api/statistics", 3006),
    ]
    .into_iter()
    .map(|(name, prefix, port)| RouteConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        instances: vec![ServiceInstance::new(format!("http://localhost:{port}"))],
        ..RouteConfig::default()
    })
    .collect()
}

impl GatewayConfig {
    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::validation("at least one route is required"));
        }

        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();
        for route in &self.routes {
            route.validate()?;
            if !names.insert(route.name.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate route name: {}",
                    route.name
                )));
            }
            if !prefixes.insert(route.path_prefix.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate path prefix: {}",
                    route.path_prefix
                )));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "circuitBreaker.failureThreshold must be at least 1",
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::validation("cache.maxSize must be at least 1"));
        }
        self.rate_limit.validate()?;

        Ok(())
    }

    /// Routes converted to their runtime representation, in match order
    pub fn service_routes(&self) -> Vec<ServiceRoute> {
        self.routes.iter().map(RouteConfig::to_route).collect()
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Maximum accepted request body
    pub body_limit_bytes: usize,
    /// Time allowed for in-flight requests at shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            body_limit_bytes: 10 * 1024 * 1024,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ServerSettings {
    /// `host:port` bind string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A routed service
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteConfig {
    /// Service name
    pub name: String,
    /// Path prefix claimed by the service
    pub path_prefix: String,
    /// Backend instances
    pub instances: Vec<ServiceInstance>,
    /// Health endpoint on each instance
    pub health_check_path: String,
    /// Per-attempt backend timeout
    pub timeout_ms: u64,
    /// Extra attempts after a backend failure
    pub retries: u32,
    /// Instance selection strategy
    pub strategy: LoadBalancingStrategy,
    /// Roles allowed on this route
    pub required_roles: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            path_prefix: String::new(),
            instances: Vec::new(),
            health_check_path: "/health".to_string(),
            timeout_ms: 30_000,
            retries: 0,
            strategy: LoadBalancingStrategy::RoundRobin,
            required_roles: Vec::new(),
        }
    }
}

impl RouteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("route name must not be empty"));
        }
        if !self.path_prefix.starts_with('/') {
            return Err(ConfigError::validation(format!(
                "route {}: pathPrefix must start with '/'",
                self.name
            )));
        }
        if self.instances.is_empty() {
            return Err(ConfigError::validation(format!(
                "route {}: at least one instance is required",
                self.name
            )));
        }
        for instance in &self.instances {
            let parsed = url::Url::parse(&instance.url).map_err(|e| {
                ConfigError::validation(format!(
                    "route {}: invalid instance url {}: {e}",
                    self.name, instance.url
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::validation(format!(
                    "route {}: instance url {} must use http or https",
                    self.name, instance.url
                )));
            }
        }
        Ok(())
    }

    /// Runtime route
    pub fn to_route(&self) -> ServiceRoute {
        ServiceRoute {
            name: self.name.clone(),
            path_prefix: self.path_prefix.clone(),
            instances: self.instances.clone(),
            health_check_path: self.health_check_path.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            strategy: self.strategy,
            required_roles: self.required_roles.clone(),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe
    pub reset_timeout_ms: u64,
    /// Skip instances whose breaker is open during selection
    pub exclude_open_instances: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            exclude_open_instances: true,
        }
    }
}

impl CircuitBreakerSettings {
    /// Reset timeout as a duration
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Response cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    /// Enable the cache
    pub enabled: bool,
    /// Default entry lifetime
    pub ttl_ms: u64,
    /// Maximum number of entries
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_size: 1000,
        }
    }
}

impl CacheSettings {
    /// Default TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Enable rate limiting
    pub enabled: bool,
    /// Limiting strategy
    pub strategy: RateLimitStrategy,
    /// Window length for the window strategies
    pub window_ms: u64,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Bucket capacity for the token bucket
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::FixedWindow,
            window_ms: 60_000,
            max_requests: 100,
            max_tokens: 100,
            refill_rate: 10.0,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.strategy {
            RateLimitStrategy::FixedWindow | RateLimitStrategy::SlidingWindow => {
                if self.window_ms == 0 || self.max_requests == 0 {
                    return Err(ConfigError::validation(
                        "rateLimit.windowMs and rateLimit.maxRequests must be at least 1",
                    ));
                }
            }
            RateLimitStrategy::TokenBucket => {
                if self.max_tokens == 0 {
                    return Err(ConfigError::validation(
                        "rateLimit.maxTokens must be at least 1",
                    ));
                }
                if !(self.refill_rate > 0.0 && self.refill_rate.is_finite()) {
                    return Err(ConfigError::validation(
                        "rateLimit.refillRate must be positive",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Window length as a duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Metrics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsSettings {
    /// Enable metrics collection
    pub enabled: bool,
    /// Count requests
    pub collect_request_metrics: bool,
    /// Count errors
    pub collect_error_metrics: bool,
    /// Accumulate response times
    pub collect_response_time_metrics: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_request_metrics: true,
            collect_error_metrics: true,
            collect_response_time_metrics: true,
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSettings {
    /// Require a bearer credential
    pub enabled: bool,
    /// Paths that skip authentication; a trailing `*` matches by prefix
    pub bypass_paths: Vec<String>,
    /// Paths that skip the role check but still need a credential
    pub role_bypass_paths: Vec<String>,
    /// HS256 signing secret; structural checks only when absent
    pub secret: Option<SecretString>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass_paths: vec![
                "/health".to_string(),
                "/live".to_string(),
                "/ready".to_string(),
                "/metrics".to_string(),
                "/api/auth/*".to_string(),
            ],
            role_bypass_paths: Vec::new(),
            secret: None,
        }
    }
}

/// Health polling settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthSettings {
    /// Poll backends in the background
    pub enabled: bool,
    /// Poll interval
    pub interval_ms: u64,
    /// Probe timeout
    pub timeout_ms: u64,
    /// Response time above which a 2xx probe is degraded
    pub degraded_threshold_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            degraded_threshold_ms: 5_000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default level filter, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
