//! Gateway error taxonomy.
//!
//! Every failure the dispatch pipeline can produce is a [`GatewayError`]. Errors
//! raised before a backend is contacted map to an immediate HTTP response; backend
//! failures are additionally fed to the circuit breaker.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error type
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No route prefix matched the request path
    #[error("No route matches path: {path}")]
    RouteNotFound {
        /// Request path
        path: String,
    },

    /// Missing, malformed or expired credential
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Error message
        message: String,
    },

    /// Authenticated principal lacks a required role
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Error message
        message: String,
    },

    /// Client exceeded its request allowance
    #[error("Rate limit exceeded for {key}")]
    RateLimited {
        /// Client key that was limited
        key: String,
        /// Time until the client may retry
        retry_after: Option<Duration>,
    },

    /// Circuit breaker is open for the service
    #[error("Circuit breaker open for service: {service}")]
    CircuitOpen {
        /// Service name
        service: String,
    },

    /// Every instance was excluded or carries zero weight
    #[error("No instance available for service: {service}")]
    NoInstanceAvailable {
        /// Service name
        service: String,
    },

    /// Backend call exceeded the route timeout
    #[error("Backend {service} timed out after {timeout:?}")]
    BackendTimeout {
        /// Service name
        service: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Backend answered with a 5xx status
    #[error("Backend {service} returned status {status}")]
    BackendError {
        /// Service name
        service: String,
        /// Upstream status code
        status: u16,
    },

    /// Backend could not be reached
    #[error("Backend {service} unreachable: {message}")]
    BackendUnreachable {
        /// Service name
        service: String,
        /// Transport error description
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Internal invariant failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create a route-not-found error
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a rate-limited error
    pub fn rate_limited(key: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            key: key.into(),
            retry_after,
        }
    }

    /// Create a circuit-open error
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Create a no-instance error
    pub fn no_instance(service: impl Into<String>) -> Self {
        Self::NoInstanceAvailable {
            service: service.into(),
        }
    }

    /// Create a backend timeout error
    pub fn backend_timeout(service: impl Into<String>, timeout: Duration) -> Self {
        Self::BackendTimeout {
            service: service.into(),
            timeout,
        }
    }

    /// Create a backend 5xx error
    pub fn backend_error(service: impl Into<String>, status: u16) -> Self {
        Self::BackendError {
            service: service.into(),
            status,
        }
    }

    /// Create a backend unreachable error
    pub fn backend_unreachable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code surfaced to the client
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } => 404,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::CircuitOpen { .. } => 503,
            Self::NoInstanceAvailable { .. } => 503,
            Self::BackendTimeout { .. } => 504,
            Self::BackendError { .. } => 502,
            Self::BackendUnreachable { .. } => 503,
            Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Stable error code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::NoInstanceAvailable { .. } => "no_instance_available",
            Self::BackendTimeout { .. } => "backend_timeout",
            Self::BackendError { .. } => "backend_error",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether this outcome counts against a backend's circuit breaker.
    ///
    /// Client-side errors never do; only timeouts, 5xx answers and
    /// connection failures are backend health signals.
    #[must_use]
    pub fn is_circuit_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. } | Self::BackendError { .. } | Self::BackendUnreachable { .. }
        )
    }

    /// Whether the dispatcher may re-run selection for this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_circuit_failure()
    }
}
