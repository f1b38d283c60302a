//! Per-service request metrics.
//!
//! Aggregates are kept per `service_method` key and mirrored into a
//! Prometheus registry owned by the collector, so every collector (and every
//! test) has its own isolated set of series.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether anything is recorded
    pub enabled: bool,
    /// Count requests
    pub collect_request_metrics: bool,
    /// Count responses with status >= 400
    pub collect_error_metrics: bool,
    /// Accumulate response times
    pub collect_response_time_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_request_metrics: true,
            collect_error_metrics: true,
            collect_response_time_metrics: true,
        }
    }
}

/// Aggregate for one `service_method` key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    /// Requests observed
    pub request_count: u64,
    /// Requests answered with status >= 400
    pub error_count: u64,
    /// Sum of response times in milliseconds
    pub total_response_time: u64,
    /// Fastest response in milliseconds
    pub min_response_time: u64,
    /// Slowest response in milliseconds
    pub max_response_time: u64,
    /// Time of the latest request
    pub last_request_time: Option<DateTime<Utc>>,
}

impl ServiceMetrics {
    /// Mean response time in milliseconds
    #[must_use]
    pub fn average_response_time(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_response_time as f64 / self.request_count as f64
        }
    }
}

/// Metrics errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prometheus rejected a metric definition or encoding failed
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    /// Exposition output was not UTF-8
    #[error("Invalid exposition output: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Request metrics collector
pub struct MetricsCollector {
    config: MetricsConfig,
    records: RwLock<HashMap<String, ServiceMetrics>>,
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("keys", &self.records.read().len())
            .finish_non_exhaustive()
    }
}

impl MetricsCollector {
    /// Create a collector with its own Prometheus registry
    pub fn new(config: MetricsConfig) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Requests handled by the gateway"),
            &["service", "method", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Gateway request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["service", "method"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            config,
            records: RwLock::new(HashMap::new()),
            registry,
            requests_total,
            request_duration,
        })
    }

    /// Aggregation key for a service and method
    #[must_use]
    pub fn key(service: &str, method: &str) -> String {
        format!("{service}_{method}")
    }

    /// Record one completed request
    pub fn record_request(&self, service: &str, method: &str, status: u16, response_time: Duration) {
        if !self.config.enabled {
            return;
        }
        let millis = response_time.as_millis() as u64;

        {
            let key = Self::key(service, method);
            let mut records = self.records.write();
            let first = !records.contains_key(&key);
            let record = records.entry(key).or_default();

            if self.config.collect_request_metrics {
                record.request_count += 1;
            }
            if self.config.collect_error_metrics && status >= 400 {
                record.error_count += 1;
            }
            if self.config.collect_response_time_metrics {
                record.total_response_time += millis;
                record.min_response_time = if first {
                    millis
                } else {
                    record.min_response_time.min(millis)
                };
                record.max_response_time = record.max_response_time.max(millis);
            }
            record.last_request_time = Some(Utc::now());
        }

        let status = status.to_string();
        self.requests_total
            .with_label_values(&[service, method, status.as_str()])
            .inc();
        if self.config.collect_response_time_metrics {
            self.request_duration
                .with_label_values(&[service, method])
                .observe(response_time.as_secs_f64());
        }
    }

    /// Record a failed request; same as [`Self::record_request`]
    pub fn record_error(&self, service: &str, method: &str, status: u16, response_time: Duration) {
        self.record_request(service, method, status, response_time);
    }

    /// Copies of every record whose service starts with the prefix
    #[must_use]
    pub fn get_service_metrics(&self, service_prefix: &str) -> HashMap<String, ServiceMetrics> {
        self.records
            .read()
            .iter()
            .filter(|(key, _)| matches_service(key, service_prefix))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    /// Copies of every record
    #[must_use]
    pub fn get_all_metrics(&self) -> HashMap<String, ServiceMetrics> {
        self.records.read().clone()
    }

    /// Mean response time in milliseconds across matching records
    #[must_use]
    pub fn get_average_response_time(&self, service: &str) -> f64 {
        let (total, count) = self
            .get_service_metrics(service)
            .values()
            .fold((0u64, 0u64), |(t, c), r| (t + r.total_response_time, c + r.request_count));
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Error count across matching records
    #[must_use]
    pub fn get_error_count(&self, service: &str) -> u64 {
        self.get_service_metrics(service)
            .values()
            .map(|r| r.error_count)
            .sum()
    }

    /// Request count across matching records
    #[must_use]
    pub fn get_request_count(&self, service: &str) -> u64 {
        self.get_service_metrics(service)
            .values()
            .map(|r| r.request_count)
            .sum()
    }

    /// Delete matching records, or everything when no prefix is given.
    ///
    /// Prometheus series are monotonic and only cleared by a full reset.
    pub fn reset_metrics(&self, service_prefix: Option<&str>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        match service_prefix {
            Some(prefix) => records.retain(|key, _| !matches_service(key, prefix)),
            None => {
                records.clear();
                self.requests_total.reset();
                self.request_duration.reset();
            }
        }
        before - records.len()
    }

    /// Prometheus text exposition of the collector's registry
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Underlying registry, for registering further collectors
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Prefix match on the service portion of a `service_method` key
fn matches_service(key: &str, prefix: &str) -> bool {
    let service = key.rsplit_once('_').map_or(key, |(service, _)| service);
    service.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig::default()).unwrap()
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_record_aggregates() {
        let m = collector();
        m.record_request("svc", "GET", 200, ms(100));
        m.record_request("svc", "GET", 200, ms(200));
        m.record_request("svc", "GET", 500, ms(150));

        let record = &m.get_all_metrics()["svc_GET"];
        assert_eq!(record.request_count, 3);
        assert_eq!(record.error_count, 1);
        assert_eq!(record.total_response_time, 450);
        assert_eq!(record.min_response_time, 100);
        assert_eq!(record.max_response_time, 200);
        assert!(record.last_request_time.is_some());
        assert!((m.get_average_response_time("svc") - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_service_prefix_matching() {
        let m = collector();
        m.record_request("auth", "GET", 200, ms(1));
        m.record_request("auth-service", "GET", 200, ms(1));
        m.record_request("auth-service-v2", "POST", 401, ms(1));
        m.record_request("users", "GET", 200, ms(1));

        let auth = m.get_service_metrics("auth");
        assert_eq!(auth.len(), 3);
        assert!(auth.contains_key("auth_GET"));
        assert!(auth.contains_key("auth-service_GET"));
        assert!(auth.contains_key("auth-service-v2_POST"));
        assert_eq!(m.get_request_count("auth"), 3);
        assert_eq!(m.get_error_count("auth"), 1);
    }

    #[test]
    fn test_reset_prefix_leaves_others() {
        let m = collector();
        m.record_request("auth", "GET", 200, ms(1));
        m.record_request("auth-service", "POST", 200, ms(1));
        m.record_request("courses", "GET", 200, ms(1));

        assert_eq!(m.reset_metrics(Some("auth")), 2);
        let all = m.get_all_metrics();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("courses_GET"));

        assert_eq!(m.reset_metrics(None), 1);
        assert!(m.get_all_metrics().is_empty());
    }

    #[test]
    fn test_returned_maps_are_copies() {
        let m = collector();
        m.record_request("news", "GET", 200, ms(10));
        let mut copy = m.get_all_metrics();
        copy.get_mut("news_GET").unwrap().request_count = 99;
        copy.clear();
        assert_eq!(m.get_request_count("news"), 1);
    }

    #[test]
    fn test_disabled_collector_records_nothing() {
        let m = MetricsCollector::new(MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        })
        .unwrap();
        m.record_request("svc", "GET", 200, ms(5));
        assert!(m.get_all_metrics().is_empty());
    }

    #[test]
    fn test_collect_flags_gate_fields() {
        let m = MetricsCollector::new(MetricsConfig {
            collect_error_metrics: false,
            collect_response_time_metrics: false,
            ..MetricsConfig::default()
        })
        .unwrap();
        m.record_error("svc", "GET", 503, ms(40));
        let record = &m.get_all_metrics()["svc_GET"];
        assert_eq!(record.request_count, 1);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.total_response_time, 0);
    }

    #[test]
    fn test_prometheus_exposition() {
        let m = collector();
        m.record_request("planning", "GET", 200, ms(12));
        let text = m.encode().unwrap();
        assert!(text.contains("gateway_requests_total"));
        assert!(text.contains("service=\"planning\""));
        assert!(text.contains("gateway_request_duration_seconds_bucket"));
    }

    #[test]
    fn test_collectors_are_isolated() {
        let a = collector();
        let b = collector();
        a.record_request("svc", "GET", 200, ms(1));
        assert!(!b.encode().unwrap().contains("service=\"svc\""));
    }
}
