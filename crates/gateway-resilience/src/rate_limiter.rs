//! Per-client rate limiting.
//!
//! Windows are kept per client key and pruned lazily when the key is checked,
//! so idle clients cost no background work.

use dashmap::DashMap;
use gateway_core::RateLimitStrategy;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether requests are limited at all
    pub enabled: bool,
    /// Counting strategy
    pub strategy: RateLimitStrategy,
    /// Window length for the window strategies
    pub window: Duration,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Bucket capacity
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::FixedWindow,
            window: Duration::from_secs(60),
            max_requests: 100,
            max_tokens: 100,
            refill_rate: 10.0,
        }
    }
}

#[derive(Debug)]
enum Window {
    Requests {
        timestamps: VecDeque<Instant>,
    },
    Bucket {
        tokens: f64,
        last_refill: Instant,
    },
}

/// Outcome of [`RateLimiter::check_and_record`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests or tokens allowed per window
    pub limit: u32,
    /// Requests or whole tokens left
    pub remaining: u32,
    /// Time until the next request would be allowed, when denied
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

/// Rate limiter keyed by client
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Create a limiter with no tracked clients
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Limiter configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether the client is over its allowance.
    ///
    /// For the token bucket a successful check consumes a token.
    pub fn is_limited(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let now = Instant::now();
        match self.config.strategy {
            RateLimitStrategy::TokenBucket => {
                let mut window = self
                    .windows
                    .entry(key.to_string())
                    .or_insert_with(|| self.full_bucket(now));
                !self.take_token(&mut window, now)
            }
            _ => {
                let Some(mut window) = self.windows.get_mut(key) else {
                    return false;
                };
                self.prune(&mut window, now);
                self.request_count(&window) >= self.config.max_requests as usize
            }
        }
    }

    /// Count a request against the client.
    ///
    /// A no-op for the token bucket, which consumes in [`Self::is_limited`].
    pub fn record_request(&self, key: &str) {
        if !self.config.enabled || self.config.strategy == RateLimitStrategy::TokenBucket {
            return;
        }
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(Self::empty_window);
        self.prune(&mut window, now);
        if let Window::Requests { timestamps, .. } = &mut *window {
            timestamps.push_back(now);
        }
    }

    /// Check and, when allowed, count the request in one step
    pub fn check_and_record(&self, key: &str) -> RateLimitDecision {
        let limit = self.limit();
        if !self.config.enabled {
            return RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit,
                retry_after: None,
            };
        }

        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| {
            if self.config.strategy == RateLimitStrategy::TokenBucket {
                self.full_bucket(now)
            } else {
                Self::empty_window()
            }
        });

        let allowed = match self.config.strategy {
            RateLimitStrategy::TokenBucket => self.take_token(&mut window, now),
            _ => {
                self.prune(&mut window, now);
                let allowed = self.request_count(&window) < self.config.max_requests as usize;
                if allowed {
                    if let Window::Requests { timestamps, .. } = &mut *window {
                        timestamps.push_back(now);
                    }
                }
                allowed
            }
        };

        let remaining = match &*window {
            Window::Requests { timestamps, .. } => {
                limit.saturating_sub(timestamps.len() as u32)
            }
            Window::Bucket { tokens, .. } => tokens.floor() as u32,
        };
        let retry_after = (!allowed).then(|| self.retry_after(&window, now));
        if !allowed {
            debug!(client = %key, strategy = ?self.config.strategy, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining,
            retry_after,
        }
    }

    /// Forget a client
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Number of tracked clients
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    fn limit(&self) -> u32 {
        match self.config.strategy {
            RateLimitStrategy::TokenBucket => self.config.max_tokens,
            _ => self.config.max_requests,
        }
    }

    fn empty_window() -> Window {
        Window::Requests {
            timestamps: VecDeque::new(),
        }
    }

    fn full_bucket(&self, now: Instant) -> Window {
        Window::Bucket {
            tokens: f64::from(self.config.max_tokens),
            last_refill: now,
        }
    }

    fn request_count(&self, window: &Window) -> usize {
        match window {
            Window::Requests { timestamps, .. } => timestamps.len(),
            Window::Bucket { .. } => 0,
        }
    }

    /// Drop timestamps that no longer count
    fn prune(&self, window: &mut Window, now: Instant) {
        let Window::Requests { timestamps } = window else {
            return;
        };
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.config.window)
        {
            timestamps.pop_front();
        }
    }

    /// Refill the bucket and take one token if available
    fn take_token(&self, window: &mut Window, now: Instant) -> bool {
        let Window::Bucket {
            tokens,
            last_refill,
        } = window
        else {
            return true;
        };
        let elapsed = now.duration_since(*last_refill).as_secs_f64();
        let refilled = (*tokens + elapsed * self.config.refill_rate)
            .min(f64::from(self.config.max_tokens));
        *last_refill = now;
        if refilled >= 1.0 {
            *tokens = refilled - 1.0;
            true
        } else {
            *tokens = refilled;
            false
        }
    }

    fn retry_after(&self, window: &Window, now: Instant) -> Duration {
        match window {
            Window::Requests { timestamps } => timestamps.front().map_or(Duration::ZERO, |oldest| {
                (*oldest + self.config.window).saturating_duration_since(now)
            }),
            Window::Bucket { tokens, .. } => {
                let missing = (1.0 - tokens).max(0.0);
                Duration::from_secs_f64(missing / self.config.refill_rate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(strategy: RateLimitStrategy, max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            strategy,
            window: Duration::from_millis(window_ms),
            max_requests,
            max_tokens: 2,
            refill_rate: 1.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_limits_after_max_requests() {
        let rl = limiter(RateLimitStrategy::FixedWindow, 3, 1000);
        for _ in 0..3 {
            assert!(!rl.is_limited("10.0.0.1"));
            rl.record_request("10.0.0.1");
        }
        assert!(rl.is_limited("10.0.0.1"));
        assert!(!rl.is_limited("10.0.0.2"));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!rl.is_limited("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_counts_requests_younger_than_window() {
        let rl = limiter(RateLimitStrategy::FixedWindow, 2, 1000);
        rl.record_request("c");
        tokio::time::advance(Duration::from_millis(900)).await;
        rl.record_request("c");
        assert!(rl.is_limited("c"));

        // At t=1000 only the first request has aged out; the one at t=900
        // still counts alongside the new one.
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!rl.is_limited("c"));
        rl.record_request("c");
        assert!(rl.is_limited("c"));

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(!rl.is_limited("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_expires_old_requests() {
        let rl = limiter(RateLimitStrategy::SlidingWindow, 2, 1000);
        rl.record_request("c");
        tokio::time::advance(Duration::from_millis(900)).await;
        rl.record_request("c");
        assert!(rl.is_limited("c"));

        // Only the first request has left the trailing window
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!rl.is_limited("c"));
        rl.record_request("c");
        assert!(rl.is_limited("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_consumes_and_refills() {
        let rl = limiter(RateLimitStrategy::TokenBucket, 0, 0);
        assert!(!rl.is_limited("c"));
        assert!(!rl.is_limited("c"));
        assert!(rl.is_limited("c"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(rl.is_limited("c"));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!rl.is_limited("c"));
        assert!(rl.is_limited("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_caps_at_max_tokens() {
        let rl = limiter(RateLimitStrategy::TokenBucket, 0, 0);
        assert!(!rl.is_limited("c"));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!rl.is_limited("c"));
        assert!(!rl.is_limited("c"));
        assert!(rl.is_limited("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_and_record_decision() {
        let rl = limiter(RateLimitStrategy::FixedWindow, 2, 1000);
        let first = rl.check_and_record("c");
        assert!(first.allowed);
        assert_eq!(first.limit, 2);
        assert_eq!(first.remaining, 1);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(rl.check_and_record("c").remaining, 0);

        let denied = rl.check_and_record("c");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_retry_after() {
        let rl = limiter(RateLimitStrategy::TokenBucket, 0, 0);
        rl.check_and_record("c");
        rl.check_and_record("c");
        let denied = rl.check_and_record("c");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_disabled_limiter_never_limits() {
        let rl = RateLimiter::new(RateLimitConfig {
            enabled: false,
            max_requests: 1,
            ..RateLimitConfig::default()
        });
        for _ in 0..10 {
            rl.record_request("c");
            assert!(!rl.is_limited("c"));
            assert!(rl.check_and_record("c").allowed);
        }
        assert_eq!(rl.tracked_clients(), 0);
    }

    #[test]
    fn test_reset_forgets_client() {
        let rl = limiter(RateLimitStrategy::SlidingWindow, 1, 60_000);
        rl.record_request("c");
        assert!(rl.is_limited("c"));
        rl.reset("c");
        assert!(!rl.is_limited("c"));
    }
}
