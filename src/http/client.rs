//! Outbound HTTP transport.
//!
//! # Responsibilities
//! - Pool connections to backends (hyper-util legacy client)
//! - Enforce a global and a per-backend ceiling on concurrent forwards
//! - Bound every exchange by a deadline
//! - Buffer the upstream body, up to a size limit, so the exchange completes
//!   inside the deadline
//!
//! # Design Decisions
//! - Redirects are never followed; a 3xx is an answer like any other
//! - The ceilings are semaphores, independent of the load balancer's
//!   advisory connection counts
//! - Closing the transport fails new forwards; in-flight ones finish

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use dashmap::DashMap;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::sync::Semaphore;
use tokio::time;

use crate::config::TransportConfig;

/// Pooled HTTP/1.1 client.
pub type HttpClient = Client<HttpConnector, Body>;

/// Why a forward produced no upstream response.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream body: {0}")]
    Body(#[from] axum::Error),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("transport is closed")]
    Closed,
}

/// Build a pooled client.
pub fn build_client(connect_timeout: Duration, idle_timeout: Duration, max_idle_per_host: usize) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(idle_timeout)
        .pool_max_idle_per_host(max_idle_per_host)
        .build(connector)
}

/// Shared outbound transport for forwarded requests.
#[derive(Debug)]
pub struct Transport {
    client: HttpClient,
    global: Arc<Semaphore>,
    per_backend: DashMap<String, Arc<Semaphore>>,
    per_backend_limit: usize,
    max_body: usize,
}

impl Transport {
    pub fn new(config: &TransportConfig) -> Self {
        let client = build_client(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.idle_timeout_secs),
            config.max_connections_per_backend,
        );
        Self {
            client,
            global: Arc::new(Semaphore::new(config.max_connections)),
            per_backend: DashMap::new(),
            per_backend_limit: config.max_connections_per_backend,
            max_body: config.max_response_body_bytes,
        }
    }

    /// Send `request` to the backend at `authority` and buffer the answer.
    ///
    /// Waiting for a connection slot counts against `timeout`. A body larger
    /// than `transport.max_response_body_bytes` fails with
    /// [`UpstreamError::Body`].
    pub async fn send(
        &self,
        authority: &str,
        request: Request<Body>,
        timeout: Duration,
    ) -> Result<Response<Bytes>, UpstreamError> {
        let exchange = async {
            let _global = self
                .global
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| UpstreamError::Closed)?;
            let _backend = self
                .backend_slots(authority)
                .acquire_owned()
                .await
                .map_err(|_| UpstreamError::Closed)?;

            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), self.max_body).await?;
            Ok::<_, UpstreamError>(Response::from_parts(parts, bytes))
        };

        match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout)),
        }
    }

    fn backend_slots(&self, authority: &str) -> Arc<Semaphore> {
        if let Some(slots) = self.per_backend.get(authority) {
            return slots.clone();
        }
        self.per_backend
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_backend_limit)))
            .clone()
    }

    /// Drop the connection ceiling kept for `authority`.
    ///
    /// Forwards already holding a slot keep their semaphore alive.
    pub fn forget_backend(&self, authority: &str) {
        self.per_backend.remove(authority);
    }

    /// Number of authorities with a connection ceiling.
    pub fn tracked_backends(&self) -> usize {
        self.per_backend.len()
    }

    /// Refuse new forwards. Requests already holding a slot complete.
    pub fn close(&self) {
        self.global.close();
        for slots in self.per_backend.iter() {
            slots.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.global.is_closed()
    }

    /// Free global slots.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(global: usize, per_backend: usize) -> TransportConfig {
        TransportConfig {
            max_connections: global,
            max_connections_per_backend: per_backend,
            ..TransportConfig::default()
        }
    }

    fn get(authority: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("http://{}/", authority))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_buffers_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 5\r\nConnection: close\r\n\r\nmoved")
                .await;
        });

        let transport = Transport::new(&config(4, 2));
        let response = transport
            .send(&addr.to_string(), get(&addr.to_string()), Duration::from_secs(5))
            .await
            .unwrap();

        // Redirects are surfaced, not followed.
        assert_eq!(response.status(), 302);
        assert_eq!(response.headers()["location"], "/elsewhere");
        assert_eq!(response.body().as_ref(), b"moved");
        assert_eq!(transport.available(), 4);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "x".repeat(4096);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
        });

        let transport = Transport::new(&TransportConfig {
            max_response_body_bytes: 1024,
            ..config(4, 2)
        });
        let err = transport
            .send(&addr.to_string(), get(&addr.to_string()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Body(_)));
        assert_eq!(transport.available(), 4);
    }

    #[tokio::test]
    async fn test_forget_backend_drops_ceiling() {
        let transport = Transport::new(&config(4, 2));
        transport.backend_slots("10.0.0.1:80");
        transport.backend_slots("10.0.0.2:80");
        assert_eq!(transport.tracked_backends(), 2);

        transport.forget_backend("10.0.0.1:80");
        assert_eq!(transport.tracked_backends(), 1);
        transport.forget_backend("10.0.0.9:80");
        assert_eq!(transport.tracked_backends(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let transport = Transport::new(&config(4, 2));
        let err = transport
            .send(&addr.to_string(), get(&addr.to_string()), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)));
        assert_eq!(transport.available(), 4);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let transport = Transport::new(&config(4, 2));
        let err = transport
            .send(&addr.to_string(), get(&addr.to_string()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Request(_)));
    }

    #[tokio::test]
    async fn test_closed_transport_refuses() {
        let transport = Transport::new(&config(4, 2));
        transport.close();
        assert!(transport.is_closed());
        let err = transport
            .send("127.0.0.1:1", get("127.0.0.1:1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Closed));
    }
}
