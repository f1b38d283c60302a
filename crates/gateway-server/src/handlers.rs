//! HTTP request handlers for the gateway API.

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{ApiResponse, GatewayError, GatewayRequest};
use gateway_resilience::{CacheStats, CircuitBreakerStats};
use gateway_telemetry::ServiceMetrics;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    dispatcher::{DispatchOutcome, UNMATCHED_SERVICE},
    error::ApiError,
    extractors::{PeerAddr, RequestId},
    health::LivenessResponse,
    state::AppState,
};

/// Aggregated health of every backend service
pub async fn health_check(State(state): State<AppState>) -> Response {
    let report = state.health.report();
    let status = StatusCode::from_u16(report.http_status_code()).unwrap_or(StatusCode::OK);
    (status, Json(report)).into_response()
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let readiness = state.health.readiness();
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}

/// Liveness check endpoint
pub async fn liveness_check() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Optional service prefix filter
#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    /// Service name prefix
    pub service: Option<String>,
}

/// Metrics snapshot, optionally filtered by service prefix
pub async fn admin_metrics(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
) -> Json<ApiResponse<HashMap<String, ServiceMetrics>>> {
    let metrics = match query.service.as_deref() {
        Some(prefix) => state.metrics.get_service_metrics(prefix),
        None => state.metrics.get_all_metrics(),
    };
    Json(ApiResponse::ok(metrics))
}

/// Reset metrics, optionally only for a service prefix
#[instrument(skip(state))]
pub async fn reset_metrics(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
) -> Json<ApiResponse<serde_json::Value>> {
    let removed = state.metrics.reset_metrics(query.service.as_deref());
    info!(service = ?query.service, removed, "Metrics reset");
    Json(ApiResponse::ok(serde_json::json!({ "removed": removed })).with_message("Metrics reset"))
}

/// Cache statistics
pub async fn cache_stats(State(state): State<AppState>) -> Json<ApiResponse<CacheStats>> {
    Json(ApiResponse::ok(state.dispatcher.cache().stats()))
}

/// Drop every cached response
pub async fn clear_cache(State(state): State<AppState>) -> Json<ApiResponse<CacheStats>> {
    let cache = state.dispatcher.cache();
    cache.clear();
    info!("Cache cleared");
    Json(ApiResponse::ok(cache.stats()).with_message("Cache cleared"))
}

/// Every circuit breaker, sorted by key
pub async fn list_circuits(State(state): State<AppState>) -> Json<ApiResponse<Vec<CircuitBreakerStats>>> {
    Json(ApiResponse::ok(state.dispatcher.breakers().snapshot()))
}

/// Close one circuit breaker
pub async fn reset_circuit(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let breakers = state.dispatcher.breakers();
    if !breakers.reset(&key) {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                404,
                "circuit_not_found",
                format!("No circuit breaker with key: {key}"),
            )),
        )
            .into_response();
    }

    info!(breaker = %key, "Circuit breaker reset by operator");
    match breakers.get(&key) {
        Some(breaker) => Json(ApiResponse::ok(breaker.stats()).with_message("Circuit reset")).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Everything that is not a gateway endpoint goes through the dispatcher
pub async fn proxy(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    PeerAddr(peer): PeerAddr,
    request: Request,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let limit = state.config.server.body_limit_bytes;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, limit, "Request body rejected");
            state.metrics.record_error(
                UNMATCHED_SERVICE,
                parts.method.as_str(),
                StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
                started.elapsed(),
            );
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ApiResponse::error(413, "payload_too_large", e.to_string())),
            )
                .into_response();
        }
    };

    let request = GatewayRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        peer_addr: peer.map(|addr| addr.ip().to_string()),
    };

    debug!(request_id = %request_id, method = %request.method, path = %request.path, "Proxying request");
    into_response(state.dispatcher.dispatch(request).await)
}

fn into_response(outcome: DispatchOutcome) -> Response {
    let mut response = match outcome.result {
        Ok(upstream) => {
            let mut response = Response::new(Body::from(upstream.body));
            *response.status_mut() =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            *response.headers_mut() = upstream.headers;
            response
        }
        Err(err) => ApiError(err).into_response(),
    };
    response.headers_mut().extend(outcome.headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::GatewayResponse;
    use http::HeaderMap;

    #[test]
    fn test_outcome_headers_applied_to_errors() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        let response = into_response(DispatchOutcome {
            result: Err(GatewayError::rate_limited("10.0.0.1", None)),
            headers,
            service: "courses".to_string(),
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[test]
    fn test_backend_status_passes_through() {
        let upstream = GatewayResponse::new(418, "teapot").with_header(header::CONTENT_TYPE, "text/plain");
        let response = into_response(DispatchOutcome {
            result: Ok(upstream),
            headers: HeaderMap::new(),
            service: "courses".to_string(),
        });
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
