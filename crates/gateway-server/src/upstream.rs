//! Backend HTTP client.
//!
//! The dispatcher and the health aggregator talk to backends only through
//! [`UpstreamClient`], so tests can substitute scripted backends.

use async_trait::async_trait;
use bytes::Bytes;
use gateway_core::GatewayResponse;
use http::{HeaderMap, Method};
use std::time::Duration;

/// Request sent to a backend instance
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL including the query string
    pub url: String,
    /// Headers to forward
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Body-less GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Transport-level upstream failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The client's own timeout fired
    #[error("request timed out")]
    Timeout,
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other transport failure
    #[error("{0}")]
    Other(String),
}

/// Client used to reach backend instances
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one request and return the backend response
    async fn send(&self, request: UpstreamRequest) -> Result<GatewayResponse, UpstreamError>;
}

/// [`UpstreamClient`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Build a client with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| UpstreamError::Other(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<GatewayResponse, UpstreamError> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else if err.is_connect() {
        UpstreamError::Connect(err.to_string())
    } else {
        UpstreamError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_upstream_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/courses"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-backend", "courses")
                    .set_body_string("[]"),
            )
            .mount(&server)
            .await;

        let client = HttpUpstream::new(Duration::from_secs(1)).unwrap();
        let response = client
            .send(UpstreamRequest::get(format!("{}/courses", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers["x-backend"], "courses");
        assert_eq!(&response.body[..], b"[]");
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let client = HttpUpstream::new(Duration::from_millis(500)).unwrap();
        let err = client
            .send(UpstreamRequest::get("http://127.0.0.1:1/health"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Connect(_) | UpstreamError::Other(_)));
    }
}
