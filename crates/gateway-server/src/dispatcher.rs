//! Request dispatch pipeline.
//!
//! Every proxied request passes through the same stages:
//!
//! 1. Authentication (skipped on bypass paths)
//! 2. Route match and role check
//! 3. Rate limit check
//! 4. Cache lookup
//! 5. Circuit check, instance selection and backend call, repeated up to
//!    `retries` extra times on backend failures
//! 6. Metrics recording and cache store
//!
//! Errors raised before a route matched are recorded under the `gateway`
//! service name.

use gateway_core::{GatewayError, GatewayRequest, GatewayResponse, GatewayResult, ServiceInstance, ServiceRoute};
use gateway_resilience::{
    CacheConfig, CachePolicy, CacheStore, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry,
    RateLimitConfig, RateLimiter,
};
use gateway_routing::{LoadBalancer, LoadBalancerConfig, RouteMatch, RouteTable};
use gateway_telemetry::{MetricsCollector, MetricsConfig};
use http::{header, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthConfig, Authenticator};
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamRequest};

/// Service name for requests that never matched a route
pub const UNMATCHED_SERVICE: &str = "gateway";

/// Request id header
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Cache status header
pub const CACHE_STATUS_HEADER: &str = "x-cache";

const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Result of dispatching one request
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Backend or cached response, or the error to render
    pub result: GatewayResult<GatewayResponse>,
    /// Headers added regardless of the result (rate limit information)
    pub headers: HeaderMap,
    /// Service the request was attributed to
    pub service: String,
}

/// Routes requests to backend instances
pub struct Dispatcher {
    routes: RouteTable,
    auth: Arc<Authenticator>,
    breakers: Arc<CircuitBreakerRegistry>,
    balancer: Arc<LoadBalancer>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<CacheStore<GatewayResponse>>,
    cache_policy: CachePolicy,
    metrics: Arc<MetricsCollector>,
    upstream: Arc<dyn UpstreamClient>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.routes().len())
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a builder
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Route table
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Authenticator
    pub fn auth(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Circuit breaker registry
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Load balancer
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Response cache
    pub fn cache(&self) -> &Arc<CacheStore<GatewayResponse>> {
        &self.cache
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Upstream client
    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.upstream
    }

    /// Run the full pipeline for one request
    pub async fn dispatch(&self, request: GatewayRequest) -> DispatchOutcome {
        let started = Instant::now();
        let mut headers = HeaderMap::new();
        let mut service = None;

        let result = self.process(&request, &mut service, &mut headers).await;

        let service = service.unwrap_or_else(|| UNMATCHED_SERVICE.to_string());
        let status = match &result {
            Ok(response) => response.status,
            Err(err) => err.status_code(),
        };
        let elapsed = started.elapsed();
        self.metrics
            .record_request(&service, request.method.as_str(), status, elapsed);

        debug!(
            request_id = request.header(REQUEST_ID_HEADER).unwrap_or("-"),
            service = %service,
            method = %request.method,
            path = %request.path,
            status,
            latency_ms = elapsed.as_millis() as u64,
            "Request dispatched"
        );

        DispatchOutcome {
            result,
            headers,
            service,
        }
    }

    async fn process(
        &self,
        request: &GatewayRequest,
        service: &mut Option<String>,
        headers: &mut HeaderMap,
    ) -> GatewayResult<GatewayResponse> {
        let principal = self.auth.authenticate(request)?;

        let matched = self.routes.resolve(&request.path)?;
        *service = Some(matched.route.name.clone());

        self.auth
            .authorize(principal.as_ref(), &matched.route, &request.path)?;

        let client_key = request.client_key();
        let decision = self.rate_limiter.check_and_record(&client_key);
        if self.rate_limiter.config().enabled {
            headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
            headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(decision.remaining));
        }
        if !decision.allowed {
            return Err(GatewayError::rate_limited(client_key, decision.retry_after));
        }

        let cache_key = (self.cache.is_enabled() && self.cache_policy.is_lookup_candidate(request))
            .then(|| self.cache_policy.key(request));

        if let Some(key) = &cache_key {
            if let Some(mut cached) = self.cache.get(key) {
                debug!(service = %matched.route.name, key = %key, "Cache hit");
                cached
                    .headers
                    .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
                return Ok(cached);
            }
        }

        let mut response = self.forward(request, &matched, &client_key).await?;

        if let Some(key) = cache_key {
            if self.cache_policy.should_cache(request, &response) {
                self.cache.set(key, response.clone(), None);
            }
            response
                .headers
                .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        }
        Ok(response)
    }

    /// Circuit check, selection and backend call, with retries
    async fn forward(
        &self,
        request: &GatewayRequest,
        matched: &RouteMatch,
        client_key: &str,
    ) -> GatewayResult<GatewayResponse> {
        let route = &matched.route;
        let route_breaker = self.breakers.for_route(&route.name);
        let attempts = route.retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if !route_breaker.allow_request() {
                debug!(service = %route.name, "Circuit open, failing fast");
                return Err(GatewayError::circuit_open(&route.name));
            }

            let instance = match self.balancer.select(route, Some(client_key)) {
                Ok(instance) => instance,
                Err(err) => {
                    route_breaker.release_probe();
                    return Err(err);
                }
            };

            let attempt_started = Instant::now();
            let instance_breaker = self.breakers.for_instance(&instance.url);
            let outcome = match claim_instance(&route_breaker, &instance_breaker, &route.name) {
                Ok(()) => self.call(request, matched, &instance).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(response) => {
                    route_breaker.record_success();
                    instance_breaker.record_success();
                    return Ok(response);
                }
                Err(err) => {
                    if err.is_circuit_failure() {
                        route_breaker.record_failure();
                        instance_breaker.record_failure();
                    }
                    warn!(
                        service = %route.name,
                        instance = %instance.url,
                        attempt,
                        attempts,
                        error = %err,
                        "Backend call failed"
                    );
                    if attempt == attempts || !(err.is_retryable() || is_lost_claim(&err)) {
                        return Err(err);
                    }
                    // dispatch records the final outcome; retried attempts
                    // are counted here.
                    self.metrics.record_error(
                        &route.name,
                        request.method.as_str(),
                        err.status_code(),
                        attempt_started.elapsed(),
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::internal("dispatch loop made no attempt")))
    }

    async fn call(
        &self,
        request: &GatewayRequest,
        matched: &RouteMatch,
        instance: &ServiceInstance,
    ) -> GatewayResult<GatewayResponse> {
        let route: &ServiceRoute = &matched.route;
        let upstream_request = UpstreamRequest {
            method: request.method.clone(),
            url: instance.target_url(&request.with_query(&matched.forward_path)),
            headers: forward_headers(request),
            body: request.body.clone(),
        };

        match tokio::time::timeout(route.timeout, self.upstream.send(upstream_request)).await {
            Err(_) | Ok(Err(UpstreamError::Timeout)) => {
                Err(GatewayError::backend_timeout(&route.name, route.timeout))
            }
            Ok(Err(err)) => Err(GatewayError::backend_unreachable(&route.name, err.to_string())),
            Ok(Ok(response)) if response.is_server_error() => {
                Err(GatewayError::backend_error(&route.name, response.status))
            }
            Ok(Ok(mut response)) => {
                for name in &HOP_BY_HOP {
                    response.headers.remove(name);
                }
                Ok(response)
            }
        }
    }
}

/// Claim the selected instance's breaker.
///
/// Moves a due instance breaker from open to half-open. The balancer checks
/// breakers without claiming them, so a concurrent request can take the
/// half-open probe first; the route probe is then handed back and the
/// attempt fails with `NoInstanceAvailable`.
fn claim_instance(
    route_breaker: &CircuitBreaker,
    instance_breaker: &CircuitBreaker,
    service: &str,
) -> GatewayResult<()> {
    if instance_breaker.allow_request() {
        Ok(())
    } else {
        route_breaker.release_probe();
        Err(GatewayError::no_instance(service))
    }
}

fn is_lost_claim(err: &GatewayError) -> bool {
    matches!(err, GatewayError::NoInstanceAvailable { .. })
}

/// Request headers as sent to the backend
fn forward_headers(request: &GatewayRequest) -> HeaderMap {
    let mut headers = request.headers.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }

    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    let forwarded = match (request.header("x-forwarded-for"), request.peer_addr.as_deref()) {
        (Some(existing), Some(peer)) => Some(format!("{existing}, {peer}")),
        (None, Some(peer)) => Some(peer.to_string()),
        _ => None,
    };
    if let Some(value) = forwarded.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert("x-forwarded-for", value);
    }
    headers
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    routes: Vec<ServiceRoute>,
    auth: Option<AuthConfig>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    balancer_config: LoadBalancerConfig,
    rate_limit: Option<RateLimitConfig>,
    cache: Option<CacheConfig>,
    cache_policy: CachePolicy,
    metrics: Option<Arc<MetricsCollector>>,
    upstream: Option<Arc<dyn UpstreamClient>>,
}

impl DispatcherBuilder {
    /// Routes in match order
    #[must_use]
    pub fn routes(mut self, routes: Vec<ServiceRoute>) -> Self {
        self.routes = routes;
        self
    }

    /// Authentication configuration
    #[must_use]
    pub fn auth(mut self, config: AuthConfig) -> Self {
        self.auth = Some(config);
        self
    }

    /// Circuit breaker configuration
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = Some(Arc::new(CircuitBreakerRegistry::new(config)));
        self
    }

    /// Load balancer configuration
    #[must_use]
    pub fn load_balancer(mut self, config: LoadBalancerConfig) -> Self {
        self.balancer_config = config;
        self
    }

    /// Rate limit configuration
    #[must_use]
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Cache configuration
    #[must_use]
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Cache key and storage policy
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Metrics collector
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Upstream client
    #[must_use]
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamClient>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> GatewayResult<Dispatcher> {
        let upstream = self
            .upstream
            .ok_or_else(|| GatewayError::configuration("upstream client is required"))?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                MetricsCollector::new(MetricsConfig::default())
                    .map_err(|e| GatewayError::internal(e.to_string()))?,
            ),
        };
        let breakers = self.breakers.unwrap_or_default();
        let balancer = Arc::new(LoadBalancer::new(self.balancer_config, Arc::clone(&breakers)));

        Ok(Dispatcher {
            routes: RouteTable::new(self.routes),
            auth: Arc::new(Authenticator::new(self.auth.unwrap_or_default())),
            breakers,
            balancer,
            rate_limiter: Arc::new(RateLimiter::new(self.rate_limit.unwrap_or_default())),
            cache: Arc::new(CacheStore::new(self.cache.unwrap_or_default())),
            cache_policy: self.cache_policy,
            metrics,
            upstream,
        })
    }
}
