//! Custom Axum extractors for the gateway.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::dispatcher::REQUEST_ID_HEADER;

/// Extract request ID from headers or generate one
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .or_else(|| parts.headers.get("x-correlation-id"))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

        Ok(Self(id))
    }
}

/// Peer address of the connection, when the server recorded it
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<SocketAddr>);

#[async_trait]
impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_request_id_prefers_header() {
        let (mut parts, ()) = Request::builder()
            .header("x-request-id", "req-7")
            .body(())
            .unwrap()
            .into_parts();
        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "req-7");
    }

    #[tokio::test]
    async fn test_request_id_generated() {
        let (mut parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_peer_addr_from_connect_info() {
        let addr: SocketAddr = "10.2.3.4:5555".parse().unwrap();
        let (mut parts, ()) = Request::builder()
            .extension(ConnectInfo(addr))
            .body(())
            .unwrap()
            .into_parts();
        let PeerAddr(peer) = PeerAddr::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(peer, Some(addr));

        let (mut parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let PeerAddr(peer) = PeerAddr::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(peer, None);
    }
}
