//! Routing domain types shared by every gateway crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single backend instance of a logical service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Base URL, e.g. `http://localhost:3001`
    pub url: String,
    /// Selection weight for the weighted strategy; 0 means never selected
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl ServiceInstance {
    /// Create an instance with weight 1
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: default_weight(),
        }
    }

    /// Set the weight
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Join a forwarded path onto the instance base URL
    #[must_use]
    pub fn target_url(&self, path: &str) -> String {
        let base = self.url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Instance selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotate through instances in order
    #[default]
    RoundRobin,
    /// Random draw proportional to instance weight
    Weighted,
    /// Stable hash of the client key
    IpHash,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Weighted => write!(f, "weighted"),
            Self::IpHash => write!(f, "ip_hash"),
        }
    }
}

/// Rate limiting strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Requests counted until they are one window old
    #[default]
    FixedWindow,
    /// Trailing window over request timestamps
    SlidingWindow,
    /// Tokens refilled at a constant rate
    TokenBucket,
}

/// Health classification of a backend instance or service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Answering within the latency threshold
    Healthy,
    /// Answering, but slowly or with an unexpected status
    Degraded,
    /// Failing or unreachable
    Unhealthy,
}

impl HealthStatus {
    /// Whether the instance may receive traffic
    #[must_use]
    pub fn is_available(self) -> bool {
        self != Self::Unhealthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A logical service reachable under a path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    /// Service name, used as the metrics and circuit breaker key
    pub name: String,
    /// Path prefix claimed by this route
    pub path_prefix: String,
    /// Backend instances
    pub instances: Vec<ServiceInstance>,
    /// Health endpoint path on each instance
    pub health_check_path: String,
    /// Per-attempt backend timeout
    pub timeout: Duration,
    /// Extra dispatch attempts after a backend failure
    pub retries: u32,
    /// Instance selection strategy
    pub strategy: LoadBalancingStrategy,
    /// Roles allowed to use this route; empty means any authenticated caller
    pub required_roles: Vec<String>,
}

impl ServiceRoute {
    /// Create a route with defaults for everything but name and prefix
    pub fn new(name: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: path_prefix.into(),
            instances: Vec::new(),
            health_check_path: "/health".to_string(),
            timeout: Duration::from_secs(30),
            retries: 0,
            strategy: LoadBalancingStrategy::RoundRobin,
            required_roles: Vec::new(),
        }
    }

    /// Add a backend instance
    #[must_use]
    pub fn with_instance(mut self, instance: ServiceInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Set the selection strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the health check path
    #[must_use]
    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    /// Restrict the route to the given roles
    #[must_use]
    pub fn with_required_roles(mut self, roles: Vec<String>) -> Self {
        self.required_roles = roles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_joins_slashes() {
        let instance = ServiceInstance::new("http://localhost:3001/");
        assert_eq!(instance.target_url("/users/1"), "http://localhost:3001/users/1");
        assert_eq!(instance.target_url("users/1"), "http://localhost:3001/users/1");
    }

    #[test]
    fn test_strategy_serde_names() {
        let parsed: LoadBalancingStrategy = serde_json::from_str("\"ip_hash\"").unwrap();
        assert_eq!(parsed, LoadBalancingStrategy::IpHash);
        let parsed: RateLimitStrategy = serde_json::from_str("\"token_bucket\"").unwrap();
        assert_eq!(parsed, RateLimitStrategy::TokenBucket);
        assert_eq!(LoadBalancingStrategy::Weighted.to_string(), "weighted");
    }

    #[test]
    fn test_instance_default_weight() {
        let instance: ServiceInstance =
            serde_json::from_str(r#"{"url": "http://localhost:3002"}"#).unwrap();
        assert_eq!(instance.weight, 1);
    }
}
