//! # Gateway Resilience
//!
//! Resilience patterns for the campus API gateway:
//! - Circuit breakers per route and per backend instance
//! - TTL/LRU response cache with a pluggable caching policy
//! - Per-client rate limiting (fixed window, sliding window, token bucket)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limiter;

// Re-export main types
pub use cache::{CacheConfig, CachePolicy, CacheStats, CacheStore, CachePredicate, KeyGenerator};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
