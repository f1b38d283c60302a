//! Inbound request representation used by the dispatch pipeline.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method};

/// Request as seen by the dispatcher, detached from the HTTP server types
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,
    /// Request path without query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
    /// Peer address of the connection, if known
    pub peer_addr: Option<String>,
}

impl GatewayRequest {
    /// Create a body-less request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer_addr: None,
        }
    }

    /// Add a header; invalid names or values are ignored
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the peer address
    #[must_use]
    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    /// Header value as a string, if present and valid UTF-8
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// User-Agent header, if present
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    /// Bearer token from the Authorization header
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Key identifying the calling client.
    ///
    /// First `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
    #[must_use]
    pub fn client_key(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return first.to_string();
            }
        }
        if let Some(real_ip) = self.header("x-real-ip").map(str::trim).filter(|s| !s.is_empty()) {
            return real_ip.to_string();
        }
        self.peer_addr
            .clone()
            .unwrap_or_else(|| "anonymous".to_string())
    }

    /// Path with the query string re-attached
    #[must_use]
    pub fn with_query(&self, path: &str) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path.to_string(),
        }
    }
}
