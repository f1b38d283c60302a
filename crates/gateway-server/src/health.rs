//! Backend health aggregation.
//!
//! Probes every instance's health endpoint, feeds the classification into
//! the load balancer and the instance circuit breakers, and builds the
//! `/health` and `/ready` responses from the latest observations.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use gateway_config::HealthSettings;
use gateway_core::{HealthStatus, ServiceInstance, ServiceRoute};
use gateway_resilience::CircuitBreakerRegistry;
use gateway_routing::{LoadBalancer, RouteTable};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::upstream::{UpstreamClient, UpstreamRequest};

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Run the background poller
    pub enabled: bool,
    /// Time between polls
    pub interval: Duration,
    /// Timeout for a single probe
    pub timeout: Duration,
    /// Successful probes slower than this are degraded
    pub degraded_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::from(&HealthSettings::default())
    }
}

impl From<&HealthSettings> for HealthConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            enabled: settings.enabled,
            interval: Duration::from_millis(settings.interval_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
            degraded_threshold: Duration::from_millis(settings.degraded_threshold_ms),
        }
    }
}

/// Classify a probe outcome.
///
/// `None` means the probe never got a response (transport error or timeout).
pub fn classify(status: Option<u16>, response_time: Duration, degraded_threshold: Duration) -> HealthStatus {
    match status {
        None => HealthStatus::Unhealthy,
        Some(s) if s >= 500 => HealthStatus::Unhealthy,
        Some(s) if (200..300).contains(&s) => {
            if response_time > degraded_threshold {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            }
        }
        Some(_) => HealthStatus::Degraded,
    }
}

/// Latest probe result for one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    /// Instance base URL
    pub url: String,
    /// Classification
    pub status: HealthStatus,
    /// HTTP status of the probe, if it got a response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Probe duration
    pub response_time_ms: u64,
    /// Transport error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the probe finished
    pub checked_at: DateTime<Utc>,
}

/// Component health check result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Last check timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<String>,
    /// Error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional details
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl ComponentHealth {
    /// Create a component with the given status
    #[must_use]
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: None,
            error: None,
            details: HashMap::new(),
        }
    }

    /// Add detail
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.details.insert(key.into(), json_value);
        }
        self
    }
}

/// Aggregated health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: HealthStatus,
    /// Gateway version
    pub version: String,
    /// Gateway uptime in seconds
    pub uptime_seconds: u64,
    /// One component per service
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentHealth>,
    /// Health score (0-100)
    pub health_score: u8,
    /// Timestamp
    pub timestamp: String,
}

impl HealthResponse {
    /// Build a response; status and score follow from the components
    #[must_use]
    pub fn new(uptime: Duration, components: Vec<ComponentHealth>) -> Self {
        let mut response = Self {
            status: HealthStatus::Healthy,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
            components,
            health_score: 100,
            timestamp: Utc::now().to_rfc3339(),
        };
        response.recalculate_score();
        response
    }

    /// HTTP status for the `/health` endpoint
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        if self.status == HealthStatus::Unhealthy {
            503
        } else {
            200
        }
    }

    fn recalculate_score(&mut self) {
        if self.components.is_empty() {
            return;
        }

        let total = self.components.len();
        let healthy = self
            .components
            .iter()
            .filter(|c| c.status == HealthStatus::Healthy)
            .count();
        let available = self
            .components
            .iter()
            .filter(|c| c.status.is_available())
            .count();

        self.health_score = ((available * 100) / total) as u8;
        self.status = if healthy == total {
            HealthStatus::Healthy
        } else if available > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
    }
}

/// Liveness response (minimal)
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    /// Status
    pub status: String,
}

/// Readiness response
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// Ready status
    pub ready: bool,
    /// Reason if not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Route count
    pub routes: usize,
    /// Routes with at least one eligible instance
    pub ready_routes: usize,
}

/// Polls backend health and publishes it to the balancer and breakers
pub struct HealthAggregator {
    config: HealthConfig,
    routes: RouteTable,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakerRegistry>,
    upstream: Arc<dyn UpstreamClient>,
    observations: RwLock<HashMap<String, InstanceHealth>>,
    started: Instant,
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("config", &self.config)
            .field("observed", &self.observations.read().len())
            .finish_non_exhaustive()
    }
}

impl HealthAggregator {
    /// Create an aggregator with no observations
    pub fn new(
        config: HealthConfig,
        routes: RouteTable,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakerRegistry>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            config,
            routes,
            balancer,
            breakers,
            upstream,
            observations: RwLock::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Health configuration
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Time since the aggregator was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Latest observation for an instance
    pub fn instance(&self, url: &str) -> Option<InstanceHealth> {
        self.observations.read().get(url).cloned()
    }

    /// Probe one instance
    pub async fn probe(&self, route: &ServiceRoute, instance: &ServiceInstance) -> InstanceHealth {
        let url = instance.target_url(&route.health_check_path);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout, self.upstream.send(UpstreamRequest::get(url))).await;
        let elapsed = started.elapsed();

        let (status_code, error) = match outcome {
            Ok(Ok(response)) => (Some(response.status), None),
            Ok(Err(err)) => (None, Some(err.to_string())),
            Err(_) => (None, Some(format!("timed out after {:?}", self.config.timeout))),
        };

        InstanceHealth {
            url: instance.url.clone(),
            status: classify(status_code, elapsed, self.config.degraded_threshold),
            status_code,
            response_time_ms: elapsed.as_millis() as u64,
            error,
            checked_at: Utc::now(),
        }
    }

    /// Probe every instance of every route concurrently and publish the results
    pub async fn poll_once(&self) -> Vec<InstanceHealth> {
        let probes = self
            .routes
            .routes()
            .iter()
            .flat_map(|route| route.instances.iter().map(move |instance| (route, instance)))
            .map(|(route, instance)| self.probe(route, instance));
        let results = join_all(probes).await;

        for result in &results {
            let previous = self
                .observations
                .write()
                .insert(result.url.clone(), result.clone())
                .map(|p| p.status);

            if previous != Some(result.status) {
                match result.status {
                    HealthStatus::Healthy => {
                        info!(instance = %result.url, "Instance healthy");
                    }
                    status => warn!(
                        instance = %result.url,
                        status = %status,
                        status_code = ?result.status_code,
                        error = ?result.error,
                        "Instance health changed"
                    ),
                }
            }

            self.balancer.set_health(&result.url, result.status);
            if result.status == HealthStatus::Unhealthy {
                self.breakers.for_instance(&result.url).record_failure();
            }
        }

        debug!(instances = results.len(), "Health poll complete");
        results
    }

    /// Poll on the configured interval until the task is aborted
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let aggregator: Weak<Self> = Arc::downgrade(self);
        let period = self.config.interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(aggregator) = aggregator.upgrade() else {
                    break;
                };
                aggregator.poll_once().await;
            }
        })
    }

    /// Health report from the latest observations.
    ///
    /// Instances that were never probed count as healthy.
    pub fn report(&self) -> HealthResponse {
        let observations = self.observations.read();
        let components = self
            .routes
            .routes()
            .iter()
            .map(|route| {
                let instances: Vec<_> = route
                    .instances
                    .iter()
                    .map(|i| observations.get(&i.url))
                    .collect();
                let statuses: Vec<HealthStatus> = instances
                    .iter()
                    .map(|o| o.map_or(HealthStatus::Healthy, |o| o.status))
                    .collect();

                let status = if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
                    HealthStatus::Healthy
                } else if statuses.iter().any(|s| s.is_available()) {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Unhealthy
                };

                let mut component = ComponentHealth::new(&route.name, status)
                    .with_detail("path_prefix", &route.path_prefix)
                    .with_detail("instances", instances.iter().flatten().collect::<Vec<_>>());
                component.last_check = instances
                    .iter()
                    .flatten()
                    .map(|o| o.checked_at)
                    .max()
                    .map(|t| t.to_rfc3339());
                if status == HealthStatus::Unhealthy {
                    component.error = Some("no healthy instance".to_string());
                }
                component
            })
            .collect();

        HealthResponse::new(self.uptime(), components)
    }

    /// Ready once every route has at least one eligible instance
    pub fn readiness(&self) -> ReadinessResponse {
        let routes = self.routes.routes();
        let not_ready: Vec<&str> = routes
            .iter()
            .filter(|route| self.balancer.candidates(route).is_empty())
            .map(|route| route.name.as_str())
            .collect();

        ReadinessResponse {
            ready: not_ready.is_empty(),
            reason: (!not_ready.is_empty())
                .then(|| format!("no eligible instance for: {}", not_ready.join(", "))),
            routes: routes.len(),
            ready_routes: routes.len() - not_ready.len(),
        }
    }
}
