//! Circuit breaker pattern implementation.
//!
//! The circuit breaker stops traffic to a failing backend and lets a single
//! probe through once the reset timeout has elapsed. Breakers are keyed by
//! route (`route:<name>`) and by instance (`instance:<url>`) and live in a
//! [`CircuitBreakerRegistry`].

use dashmap::DashMap;
use gateway_core::GatewayError;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, one probe is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before letting a probe through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    next_attempt_at: Option<Instant>,
    probe_started: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            next_attempt_at: None,
            probe_started: None,
        }
    }
}

/// Circuit breaker for a single route or instance
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(key: impl Into<String>) -> Self {
        Self::new(key, CircuitBreakerConfig::default())
    }

    /// Breaker key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state, without triggering time-based transitions
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a request may proceed.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits the caller as the probe. While a probe is in flight further
    /// requests are rejected; a probe older than the reset timeout is treated
    /// as abandoned.
    pub fn allow_request(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => match inner.probe_started {
                Some(started) if now.duration_since(started) < self.config.reset_timeout => false,
                _ => {
                    inner.probe_started = Some(now);
                    true
                }
            },
            CircuitState::Open => {
                if inner.next_attempt_at.is_some_and(|at| now >= at) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(now);
                    info!(breaker = %self.key, "Circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// [`Self::allow_request`] as a `Result`
    pub fn check(&self) -> Result<(), GatewayError> {
        if self.allow_request() {
            Ok(())
        } else {
            Err(GatewayError::circuit_open(&self.key))
        }
    }

    /// Whether a request would currently be admitted, without claiming the probe
    #[must_use]
    pub fn would_allow(&self) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => inner
                .probe_started
                .map_or(true, |started| now.duration_since(started) >= self.config.reset_timeout),
            CircuitState::Open => inner.next_attempt_at.is_some_and(|at| now >= at),
        }
    }

    /// Give back a probe slot that was claimed but never used
    pub fn release_probe(&self) {
        self.inner.lock().probe_started = None;
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.last_success = Some(now);
        inner.probe_started = None;

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.next_attempt_at = None;
            info!(breaker = %self.key, "Circuit breaker closed");
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.probe_started = None;

        debug!(
            breaker = %self.key,
            failures = inner.failure_count,
            threshold = self.config.failure_threshold,
            "Circuit breaker recorded failure"
        );

        if inner.failure_count >= self.config.failure_threshold {
            let previous = inner.state;
            inner.state = CircuitState::Open;
            inner.next_attempt_at = Some(now + self.config.reset_timeout);
            if previous != CircuitState::Open {
                warn!(
                    breaker = %self.key,
                    failures = inner.failure_count,
                    from = %previous,
                    "Circuit breaker opened"
                );
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
        info!(breaker = %self.key, "Circuit breaker reset");
    }

    /// Force the circuit open for one reset timeout
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
        inner.probe_started = None;
        warn!(breaker = %self.key, "Circuit breaker forced open");
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let inner = self.inner.lock();
        let ago = |t: Option<Instant>| t.map(|t| now.duration_since(t).as_millis() as u64);
        CircuitBreakerStats {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            last_failure_ms_ago: ago(inner.last_failure),
            last_success_ms_ago: ago(inner.last_success),
            next_attempt_in_ms: inner
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    /// Breaker key
    pub key: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the circuit last closed
    pub failure_count: u32,
    /// Total successes
    pub success_count: u64,
    /// Failures that open the circuit
    pub failure_threshold: u32,
    /// Milliseconds since the last failure
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds since the last success
    pub last_success_ms_ago: Option<u64>,
    /// Milliseconds until a probe is allowed, when open
    pub next_attempt_in_ms: Option<u64>,
}

/// Lazily created circuit breakers keyed by route or instance
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Registry key for a route
    #[must_use]
    pub fn route_key(name: &str) -> String {
        format!("route:{name}")
    }

    /// Registry key for a backend instance
    #[must_use]
    pub fn instance_key(url: &str) -> String {
        format!("instance:{url}")
    }

    /// Breaker for the key, created closed on first use
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            return Arc::clone(breaker.value());
        }
        Arc::clone(
            self.breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
                .value(),
        )
    }

    /// Breaker for the key if one exists
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| Arc::clone(b.value()))
    }

    /// Route breaker
    pub fn for_route(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(&Self::route_key(name))
    }

    /// Instance breaker
    pub fn for_instance(&self, url: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(&Self::instance_key(url))
    }

    /// Whether the instance currently rejects traffic; unknown instances do not
    #[must_use]
    pub fn instance_rejects(&self, url: &str) -> bool {
        self.get(&Self::instance_key(url))
            .is_some_and(|b| !b.would_allow())
    }

    /// Reset one breaker; false if the key is unknown
    pub fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every breaker, sorted by key
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "route:courses",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_millis(reset_ms),
            },
        )
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::with_defaults("route:auth");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        assert!(cb.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_on_failures() {
        let cb = breaker(3, 1000);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
        assert!(matches!(cb.check(), Err(GatewayError::CircuitOpen { .. })));
        assert!(cb.stats().next_attempt_in_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(3, 1000);
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.allow_request());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 100);
        cb.record_failure();
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(cb.allow_request());
        assert!(!cb.allow_request());
        assert!(!cb.would_allow());

        cb.release_probe();
        assert!(cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_expires() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_extends_timeout() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(60)).await;
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!cb.allow_request());
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(cb.allow_request());
    }

    #[test]
    fn test_client_successes_do_not_close_open_circuit() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let cb = breaker(2, 60_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_force_open() {
        let cb = breaker(5, 60_000);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_stats() {
        let cb = breaker(5, 1000);
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        let stats = cb.stats();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.state, CircuitState::Closed);
        assert!(stats.next_attempt_in_ms.is_none());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["failureThreshold"], 5);
    }

    #[test]
    fn test_registry_lazily_creates_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        });
        assert!(registry.get("route:users").is_none());
        assert!(!registry.instance_rejects("http://localhost:3002"));

        let a = registry.for_route("users");
        let b = registry.for_route("users");
        assert!(Arc::ptr_eq(&a, &b));

        registry.for_instance("http://localhost:3002").record_failure();
        assert!(registry.instance_rejects("http://localhost:3002"));

        let keys: Vec<_> = registry.snapshot().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["instance:http://localhost:3002", "route:users"]);

        assert!(registry.reset("instance:http://localhost:3002"));
        assert!(!registry.instance_rejects("http://localhost:3002"));
        assert!(!registry.reset("route:unknown"));
    }
}
