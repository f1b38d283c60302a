//! Instance selection.
//!
//! The balancer filters a route's instances down to the eligible ones (not
//! marked unhealthy, and not rejected by their circuit breaker when exclusion
//! is enabled) and then applies the route's strategy to that candidate set.

use dashmap::DashMap;
use gateway_core::{
    GatewayError, GatewayResult, HealthStatus, LoadBalancingStrategy, ServiceInstance,
    ServiceRoute,
};
use gateway_resilience::CircuitBreakerRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Load balancer configuration
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    /// Skip instances whose circuit breaker rejects traffic
    pub exclude_open_instances: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            exclude_open_instances: true,
        }
    }
}

/// Selects a backend instance for a route
#[derive(Debug)]
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    /// Round robin sequence per route
    counters: DashMap<String, AtomicU64>,
    /// Last health observation per instance URL
    health: DashMap<String, HealthStatus>,
}

impl LoadBalancer {
    /// Create a balancer sharing the given breaker registry
    #[must_use]
    pub fn new(config: LoadBalancerConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            config,
            breakers,
            counters: DashMap::new(),
            health: DashMap::new(),
        }
    }

    /// Pick an instance for the route
    pub fn select(&self, route: &ServiceRoute, client_key: Option<&str>) -> GatewayResult<ServiceInstance> {
        let candidates = self.candidates(route);
        if candidates.is_empty() {
            debug!(service = %route.name, "No eligible instance");
            return Err(GatewayError::no_instance(&route.name));
        }

        let selected = match route.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let tick = self
                    .counters
                    .entry(route.name.clone())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
                candidates[(tick % candidates.len() as u64) as usize]
            }
            LoadBalancingStrategy::Weighted => select_weighted(&candidates, rand::random::<f64>())
                .ok_or_else(|| GatewayError::no_instance(&route.name))?,
            LoadBalancingStrategy::IpHash => {
                let key = client_key.unwrap_or("anonymous");
                let index = hash_key(key).unsigned_abs() as usize % candidates.len();
                candidates[index]
            }
        };

        debug!(
            service = %route.name,
            strategy = %route.strategy,
            instance = %selected.url,
            "Selected instance"
        );
        Ok(selected.clone())
    }

    /// Instances of the route that may currently receive traffic
    #[must_use]
    pub fn candidates<'a>(&self, route: &'a ServiceRoute) -> Vec<&'a ServiceInstance> {
        route
            .instances
            .iter()
            .filter(|instance| self.is_eligible(instance))
            .collect()
    }

    fn is_eligible(&self, instance: &ServiceInstance) -> bool {
        let healthy = self
            .health
            .get(&instance.url)
            .map_or(true, |status| status.is_available());
        let circuit_ok =
            !self.config.exclude_open_instances || !self.breakers.instance_rejects(&instance.url);
        healthy && circuit_ok
    }

    /// Record the latest health observation for an instance
    pub fn set_health(&self, url: &str, status: HealthStatus) {
        self.health.insert(url.to_string(), status);
    }

    /// Latest health observation for an instance
    #[must_use]
    pub fn health_of(&self, url: &str) -> Option<HealthStatus> {
        self.health.get(url).map(|s| *s)
    }
}

/// Weighted pick for a normalized random value `r` in `[0, 1)`.
///
/// Scales `r` by the total weight and returns the first instance whose
/// cumulative weight exceeds it. Zero-weight instances are never picked;
/// `None` when every weight is zero.
#[must_use]
pub fn select_weighted<'a>(instances: &[&'a ServiceInstance], r: f64) -> Option<&'a ServiceInstance> {
    let total: u64 = instances.iter().map(|i| u64::from(i.weight)).sum();
    if total == 0 {
        return None;
    }
    let scaled = r.clamp(0.0, 1.0) * total as f64;
    let mut cumulative = 0u64;
    let mut last_weighted = None;
    for instance in instances {
        if instance.weight == 0 {
            continue;
        }
        cumulative += u64::from(instance.weight);
        last_weighted = Some(*instance);
        if scaled < cumulative as f64 {
            return Some(*instance);
        }
    }
    last_weighted
}

/// Polynomial rolling hash (`h = h * 31 + c`) over UTF-16 code units
#[must_use]
pub fn hash_key(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_resilience::CircuitBreakerConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn balancer(threshold: u32) -> LoadBalancer {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
        }));
        LoadBalancer::new(LoadBalancerConfig::default(), breakers)
    }

    fn route(strategy: LoadBalancingStrategy, weights: &[u32]) -> ServiceRoute {
        weights
            .iter()
            .enumerate()
            .fold(ServiceRoute::new("courses", "/api/courses"), |r, (i, w)| {
                r.with_instance(
                    ServiceInstance::new(format!("http://10.0.0.{}:3003", i + 1)).with_weight(*w),
                )
            })
            .with_strategy(strategy)
    }

    #[test]
    fn test_round_robin_cycles() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::RoundRobin, &[1, 1, 1]);
        let picks: Vec<_> = (0..6)
            .map(|_| lb.select(&route, None).unwrap().url)
            .collect();
        assert_eq!(picks[0], "http://10.0.0.1:3003");
        assert_eq!(picks[1], "http://10.0.0.2:3003");
        assert_eq!(picks[2], "http://10.0.0.3:3003");
        assert_eq!(picks[..3], picks[3..]);
    }

    #[test]
    fn test_weighted_distribution() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::Weighted, &[1, 2, 1]);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(lb.select(&route, None).unwrap().url).or_default() += 1;
        }
        let middle = f64::from(counts["http://10.0.0.2:3003"]) / 10_000.0;
        assert!((middle - 0.5).abs() < 0.05, "middle share was {middle}");
    }

    #[test]
    fn test_weighted_boundaries() {
        let a = ServiceInstance::new("http://a").with_weight(1);
        let zero = ServiceInstance::new("http://zero").with_weight(0);
        let b = ServiceInstance::new("http://b").with_weight(3);
        let instances = [&a, &zero, &b];

        assert_eq!(select_weighted(&instances, 0.0).unwrap().url, "http://a");
        assert_eq!(select_weighted(&instances, 0.24).unwrap().url, "http://a");
        assert_eq!(select_weighted(&instances, 0.25).unwrap().url, "http://b");
        assert_eq!(select_weighted(&instances, 0.999).unwrap().url, "http://b");
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::Weighted, &[0, 1]);
        for _ in 0..1000 {
            assert_eq!(lb.select(&route, None).unwrap().url, "http://10.0.0.2:3003");
        }
    }

    #[test]
    fn test_all_zero_weights_fail() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::Weighted, &[0, 0]);
        assert!(matches!(
            lb.select(&route, None),
            Err(GatewayError::NoInstanceAvailable { .. })
        ));
    }

    #[test]
    fn test_ip_hash_is_stable() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::IpHash, &[1, 1, 1, 1]);
        let first = lb.select(&route, Some("192.168.1.1")).unwrap();
        let second = lb.select(&route, Some("192.168.1.1")).unwrap();
        assert_eq!(first, second);

        let distinct: std::collections::HashSet<_> = (0..50)
            .map(|i| lb.select(&route, Some(&format!("10.1.0.{i}"))).unwrap().url)
            .collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_hash_key_matches_polynomial() {
        assert_eq!(hash_key(""), 0);
        assert_eq!(hash_key("a"), 97);
        assert_eq!(hash_key("ab"), 97 * 31 + 98);
        // Long keys overflow and wrap like 32-bit integer arithmetic
        assert_eq!(hash_key("polygenelubricants"), i32::MIN);
        assert_eq!(
            hash_key("255.255.255.255, 255.255.255.255, 255.255.255.255"),
            2_119_911_742
        );
    }

    #[test]
    fn test_open_instances_excluded() {
        let lb = balancer(1);
        let route = route(LoadBalancingStrategy::RoundRobin, &[1, 1]);
        lb.breakers.for_instance("http://10.0.0.1:3003").record_failure();

        for _ in 0..4 {
            assert_eq!(lb.select(&route, None).unwrap().url, "http://10.0.0.2:3003");
        }

        lb.breakers.for_instance("http://10.0.0.2:3003").record_failure();
        assert!(matches!(
            lb.select(&route, None),
            Err(GatewayError::NoInstanceAvailable { .. })
        ));
    }

    #[test]
    fn test_open_instances_kept_when_exclusion_disabled() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        }));
        let lb = LoadBalancer::new(
            LoadBalancerConfig {
                exclude_open_instances: false,
            },
            Arc::clone(&breakers),
        );
        let route = route(LoadBalancingStrategy::RoundRobin, &[1]);
        breakers.for_instance("http://10.0.0.1:3003").record_failure();
        assert!(lb.select(&route, None).is_ok());
    }

    #[test]
    fn test_unhealthy_instances_excluded() {
        let lb = balancer(5);
        let route = route(LoadBalancingStrategy::RoundRobin, &[1, 1]);
        lb.set_health("http://10.0.0.1:3003", HealthStatus::Unhealthy);
        lb.set_health("http://10.0.0.2:3003", HealthStatus::Degraded);

        assert_eq!(lb.candidates(&route).len(), 1);
        assert_eq!(lb.select(&route, None).unwrap().url, "http://10.0.0.2:3003");
        assert_eq!(lb.health_of("http://10.0.0.1:3003"), Some(HealthStatus::Unhealthy));

        lb.set_health("http://10.0.0.1:3003", HealthStatus::Healthy);
        assert_eq!(lb.candidates(&route).len(), 2);
    }
}
