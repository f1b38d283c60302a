//! Application state shared by every handler.

use gateway_config::GatewayConfig;
use gateway_core::{GatewayError, GatewayResult};
use gateway_resilience::{CacheConfig, CachePolicy, CircuitBreakerConfig, RateLimitConfig};
use gateway_routing::LoadBalancerConfig;
use gateway_telemetry::{MetricsCollector, MetricsConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    auth::{AuthConfig, Authenticator},
    dispatcher::Dispatcher,
    health::{HealthAggregator, HealthConfig},
    upstream::{HttpUpstream, UpstreamClient},
};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state
#[derive(Clone, Debug)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<GatewayConfig>,
    /// Request dispatch pipeline
    pub dispatcher: Arc<Dispatcher>,
    /// Authenticator, shared with the dispatcher
    pub auth: Arc<Authenticator>,
    /// Backend health aggregator
    pub health: Arc<HealthAggregator>,
    /// Metrics collector, shared with the dispatcher
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// Create a builder
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// Start the cache sweep and the health poller
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let cache = self.dispatcher.cache();
        if cache.is_enabled() {
            tasks.push(cache.spawn_cleanup());
        }
        if self.health.config().enabled {
            tasks.push(self.health.spawn());
        }
        info!(tasks = tasks.len(), "Background tasks started");
        tasks
    }
}

/// Builder for [`AppState`]
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<GatewayConfig>,
    upstream: Option<Arc<dyn UpstreamClient>>,
    cache_policy: CachePolicy,
}

impl AppStateBuilder {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific upstream client instead of the HTTP one
    #[must_use]
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamClient>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Override the cache key and storage policy
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Build the state and every component it owns
    pub fn build(self) -> GatewayResult<AppState> {
        let config = self.config.unwrap_or_default();

        let upstream = match self.upstream {
            Some(upstream) => upstream,
            None => Arc::new(
                HttpUpstream::new(UPSTREAM_CONNECT_TIMEOUT)
                    .map_err(|e| GatewayError::internal(e.to_string()))?,
            ),
        };

        let metrics = Arc::new(
            MetricsCollector::new(MetricsConfig {
                enabled: config.metrics.enabled,
                collect_request_metrics: config.metrics.collect_request_metrics,
                collect_error_metrics: config.metrics.collect_error_metrics,
                collect_response_time_metrics: config.metrics.collect_response_time_metrics,
            })
            .map_err(|e| GatewayError::internal(e.to_string()))?,
        );

        let dispatcher = Dispatcher::builder()
            .routes(config.service_routes())
            .auth(AuthConfig::from(&config.auth))
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                reset_timeout: config.circuit_breaker.reset_timeout(),
            })
            .load_balancer(LoadBalancerConfig {
                exclude_open_instances: config.circuit_breaker.exclude_open_instances,
            })
            .rate_limit(RateLimitConfig {
                enabled: config.rate_limit.enabled,
                strategy: config.rate_limit.strategy,
                window: config.rate_limit.window(),
                max_requests: config.rate_limit.max_requests,
                max_tokens: config.rate_limit.max_tokens,
                refill_rate: config.rate_limit.refill_rate,
            })
            .cache(CacheConfig {
                enabled: config.cache.enabled,
                default_ttl: config.cache.ttl(),
                max_size: config.cache.max_size,
            })
            .cache_policy(self.cache_policy)
            .metrics(Arc::clone(&metrics))
            .upstream(Arc::clone(&upstream))
            .build()?;

        let health = Arc::new(HealthAggregator::new(
            HealthConfig::from(&config.health),
            dispatcher.routes().clone(),
            Arc::clone(dispatcher.balancer()),
            Arc::clone(dispatcher.breakers()),
            upstream,
        ));

        Ok(AppState {
            auth: Arc::clone(dispatcher.auth()),
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            health,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::ScriptedUpstream;

    #[test]
    fn test_build_from_default_config() {
        let state = AppState::builder()
            .upstream(ScriptedUpstream::new([]))
            .build()
            .unwrap();
        assert_eq!(state.dispatcher.routes().routes().len(), 6);
        assert!(state.auth.is_enabled());
        assert!(Arc::ptr_eq(&state.metrics, state.dispatcher.metrics()));
        assert!(Arc::ptr_eq(&state.auth, state.dispatcher.auth()));
    }

    #[tokio::test]
    async fn test_background_tasks_follow_config() {
        let mut config = GatewayConfig::default();
        config.health.enabled = false;
        let state = AppState::builder()
            .config(config)
            .upstream(ScriptedUpstream::new([]))
            .build()
            .unwrap();
        let tasks = state.spawn_background_tasks();
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            task.abort();
        }
    }
}
