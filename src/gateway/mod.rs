//! Request orchestration.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → Admission (rate limiter, optional)          → 429
//!     → Circuit check (global breaker)              → 503
//!     → Selection (load balancer, healthy subset)   → 503
//!     → Circuit check (per-backend breaker scope)   → 503
//!     → Forward (connection guard, header rewrite, transport deadline)
//!         ok:  record sample, breaker success, pass the response through
//!         err: record failure, breaker failure      → 502
//!         transport closed (shutting down)          → 503
//! ```
//!
//! # Design Decisions
//! - Any upstream status is a success for the breaker; only transport
//!   failures and timeouts count against it
//! - Requests turned away before forwarding never touch backend counters,
//!   nor do requests refused because the gateway is shutting down
//! - The connection guard lives inside the forward future, so a cancelled
//!   request still releases its slot

pub mod error;
pub mod stats;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, Uri, Version, uri::PathAndQuery};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::{BackendConfig, GatewayConfig};
use crate::health::HealthMonitor;
use crate::http::client::{Transport, UpstreamError};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, HealthState, LoadBalancer, PoolError, RequestContext};
use crate::observability::metrics;
use crate::resilience::BreakerSet;
use crate::security::headers::{self, X_GATEWAY_SERVER, X_RESPONSE_TIME, X_USER_ID};
use crate::security::rate_limit::{self, RateLimiter};

pub use error::GatewayError;
pub use stats::{GatewayMetrics, GatewayStats};

/// Client identifier used when the peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

/// The API gateway: backend pool, admission control, breakers and transport.
pub struct Gateway {
    config: GatewayConfig,
    balancer: Arc<LoadBalancer>,
    rate_limiter: Option<Arc<RateLimiter>>,
    breakers: BreakerSet,
    transport: Transport,
    stats: GatewayStats,
    shutdown: Shutdown,
    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let balancer = Arc::new(LoadBalancer::from_config(
            &config.backends,
            config.load_balancing.strategy,
        ));
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));
        let breakers = BreakerSet::from_config(&config.circuit_breaker);
        let transport = Transport::new(&config.transport);

        tracing::info!(
            backends = balancer.backends().len(),
            strategy = ?balancer.strategy(),
            rate_limit = config.rate_limit.enabled,
            breaker_scope = ?breakers.scope(),
            "Gateway created"
        );

        Self {
            config,
            balancer,
            rate_limiter,
            breakers,
            transport,
            stats: GatewayStats::default(),
            shutdown: Shutdown::new(),
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Seed health state and start the background tasks. Idempotent.
    ///
    /// With health checks enabled every enabled backend is probed once
    /// before this returns. With them disabled, enabled backends are
    /// marked healthy.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(self.balancer.clone(), &self.config.health_check);
            monitor.check_all().await;
            let healthy = self.balancer.healthy_backends().len();
            tracing::info!(
                healthy,
                total = self.balancer.backends().len(),
                "Initial health check complete"
            );
            self.spawn(monitor.run(self.shutdown.subscribe()));
        } else {
            tracing::info!("Active health checks disabled, treating enabled backends as healthy");
            for backend in self.balancer.backends().iter().filter(|b| b.enabled) {
                backend.force_health(HealthState::Healthy);
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            let every = Duration::from_secs(self.config.rate_limit.sweep_interval_secs);
            self.spawn(rate_limit::run_sweeper(
                limiter.clone(),
                every,
                self.shutdown.subscribe(),
            ));
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }

    /// Stop the background tasks and refuse new forwards.
    ///
    /// Forwards already holding a transport slot run to completion.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        self.transport.close();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Gateway shut down");
    }

    /// Initialized and not shut down.
    pub fn is_running(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.shutdown.is_triggered()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn breakers(&self) -> &BreakerSet {
        &self.breakers
    }

    /// Add a backend at runtime.
    ///
    /// With health checks enabled the backend becomes selectable after its
    /// first passing probe.
    pub fn add_backend(&self, config: &BackendConfig) -> Result<Arc<Backend>, PoolError> {
        let backend = self.balancer.add_config(config)?;
        if !self.config.health_check.enabled && backend.enabled {
            backend.force_health(HealthState::Healthy);
        }
        Ok(backend)
    }

    /// Remove a backend and forget its breaker and connection ceiling.
    ///
    /// The ceiling is kept while another backend shares the authority.
    pub fn remove_backend(&self, id: &str) -> Option<Arc<Backend>> {
        let removed = self.balancer.remove(id)?;
        self.breakers.remove_backend(id);

        let authority = removed.authority();
        let shared = self
            .balancer
            .backends()
            .iter()
            .any(|b| b.authority() == authority);
        if !shared {
            self.transport.forget_backend(&authority);
        }
        Some(removed)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn metrics(&self) -> GatewayMetrics {
        GatewayMetrics {
            total_requests: self.stats.total(),
            successful_requests: self.stats.successful(),
            failed_requests: self.stats.failed(),
            rate_limited_requests: self.stats.rate_limited(),
            rejected_requests: self.stats.rejected(),
            success_rate_percent: self.stats.success_rate_percent(),
            average_response_time_seconds: self.stats.average_response_time(),
            circuit_breaker_state: self.breakers.overall_state(),
            backends: self.balancer.backends().iter().map(|b| b.stats()).collect(),
        }
    }

    /// Handle one inbound request end to end. Never fails; every outcome is
    /// an HTTP response.
    pub async fn handle_request(
        &self,
        client_addr: Option<SocketAddr>,
        request: Request<Body>,
    ) -> axum::response::Response {
        let start = Instant::now();
        let method = request.method().as_str().to_string();
        let user_id = request
            .headers()
            .get(X_USER_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let ctx = RequestContext::new(client_addr.map(|a| a.ip().to_string()), user_id);

        // 1. Admission
        if let Some(limiter) = &self.rate_limiter {
            let key = self.client_key(&ctx);
            if !limiter.is_allowed(key) {
                tracing::debug!(client = %key, "Rate limit exceeded");
                self.stats.record_rate_limited();
                metrics::record_rate_limited();
                let err = GatewayError::RateLimited {
                    reset_at: limiter.reset_unix_secs(key),
                };
                return self.refuse(err, &method, start);
            }
        }

        // 2. Circuit check
        if let Some(breaker) = self.breakers.global() {
            if !breaker.can_execute() {
                return self.refuse(GatewayError::CircuitOpen, &method, start);
            }
        }

        // 3. Selection
        let Some(backend) = self.balancer.select(&ctx) else {
            tracing::warn!("No healthy backend available");
            return self.refuse(GatewayError::NoHealthyBackend, &method, start);
        };
        let breaker = self.breakers.for_backend(&backend.id);
        if self.breakers.global().is_none() && !breaker.can_execute() {
            return self.refuse(GatewayError::CircuitOpen, &method, start);
        }

        // 4. Forward
        let result = self.forward(&backend, &ctx, request).await;
        let elapsed = start.elapsed();

        match result {
            Err(UpstreamError::Closed) => {
                tracing::debug!(backend = %backend.id, "Transport closed, refusing request");
                self.refuse(GatewayError::ShuttingDown, &method, start)
            }
            Ok(response) => {
                backend.record_success(elapsed);
                self.stats.record_success(elapsed);
                breaker.record_success();
                metrics::record_request(&method, response.status().as_u16(), &backend.id, start);

                let (mut parts, bytes) = response.into_parts();
                headers::strip_hop_by_hop(&mut parts.headers);
                headers::set(&mut parts.headers, X_GATEWAY_SERVER, &backend.id);
                headers::set(&mut parts.headers, X_RESPONSE_TIME, &format_elapsed(elapsed));
                Response::from_parts(parts, Body::from(bytes))
            }
            Err(e) => {
                tracing::warn!(
                    backend = %backend.id,
                    method = %method,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Forward failed"
                );
                backend.record_failure();
                self.stats.record_failure(elapsed);
                breaker.record_failure();

                let err = GatewayError::from(e);
                metrics::record_request(&method, err.status().as_u16(), &backend.id, start);
                err.into_response()
            }
        }
    }

    /// Rate-limit key for a request.
    fn client_key<'a>(&self, ctx: &'a RequestContext) -> &'a str {
        if self.config.rate_limit.key_by_user_id {
            if let Some(user) = ctx.user_id.as_deref() {
                return user;
            }
        }
        ctx.client_ip.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }

    fn refuse(&self, err: GatewayError, method: &str, start: Instant) -> axum::response::Response {
        if !matches!(err, GatewayError::RateLimited { .. }) {
            self.stats.record_rejected();
        }
        metrics::record_request(method, err.status().as_u16(), "none", start);
        err.into_response()
    }

    async fn forward(
        &self,
        backend: &Arc<Backend>,
        ctx: &RequestContext,
        request: Request<Body>,
    ) -> Result<Response<Bytes>, UpstreamError> {
        let guard = backend.connection_guard();
        metrics::record_active_connections(&backend.id, backend.active_connections());

        let result = self.send(backend, ctx, request).await;

        drop(guard);
        metrics::record_active_connections(&backend.id, backend.active_connections());
        result
    }

    async fn send(
        &self,
        backend: &Backend,
        ctx: &RequestContext,
        request: Request<Body>,
    ) -> Result<Response<Bytes>, UpstreamError> {
        let (mut parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        let target = format!("{}{}", backend.url(), path_and_query);
        parts.uri = target
            .parse::<Uri>()
            .map_err(|e| UpstreamError::InvalidTarget(format!("{}: {}", target, e)))?;
        parts.version = Version::HTTP_11;

        headers::strip_hop_by_hop(&mut parts.headers);
        headers::apply_forwarded(
            &mut parts.headers,
            ctx.client_ip.as_deref().unwrap_or(UNKNOWN_CLIENT),
            &self.config.listener.forwarded_proto,
            &backend.id,
        );

        self.transport
            .send(&backend.authority(), Request::from_parts(parts, body), backend.timeout)
            .await
    }
}

/// `X-Response-Time` value, in milliseconds.
fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerScope, StrategyKind};
    use crate::resilience::CircuitState;

    fn config_without_checks() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.health_check.enabled = false;
        config.load_balancing.strategy = StrategyKind::RoundRobin;
        config
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn client() -> Option<SocketAddr> {
        Some("10.0.0.7:50000".parse().unwrap())
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_micros(12_345)), "12.345ms");
    }

    #[tokio::test]
    async fn test_empty_pool_returns_503() {
        let gateway = Gateway::new(config_without_checks());
        gateway.initialize().await;

        let response = gateway.handle_request(client(), get("/")).await;
        assert_eq!(response.status(), 503);

        let m = gateway.metrics();
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_disabled_checks_mark_enabled_backends_healthy() {
        let mut config = config_without_checks();
        config.backends.push(BackendConfig::new("on", "127.0.0.1", 9001));
        let mut off = BackendConfig::new("off", "127.0.0.1", 9002);
        off.enabled = false;
        config.backends.push(off);

        let gateway = Gateway::new(config);
        gateway.initialize().await;
        assert!(gateway.is_running());

        let lb = gateway.load_balancer();
        assert_eq!(lb.get("on").unwrap().health_state(), HealthState::Healthy);
        assert_eq!(lb.get("off").unwrap().health_state(), HealthState::Unknown);

        let added = gateway.add_backend(&BackendConfig::new("late", "127.0.0.1", 9003)).unwrap();
        assert!(added.is_healthy());

        gateway.shutdown().await;
        assert!(!gateway.is_running());
    }

    #[tokio::test]
    async fn test_rate_limited_request_skips_pool() {
        let mut config = config_without_checks();
        config.rate_limit.enabled = true;
        config.rate_limit.max_requests = 1;

        let gateway = Gateway::new(config);
        gateway.initialize().await;

        // The first request is admitted and fails selection.
        assert_eq!(gateway.handle_request(client(), get("/")).await.status(), 503);

        let response = gateway.handle_request(client(), get("/")).await;
        assert_eq!(response.status(), 429);
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let m = gateway.metrics();
        assert_eq!(m.rate_limited_requests, 1);
        assert_eq!(m.rejected_requests, 1);
        assert_eq!(m.circuit_breaker_state, CircuitState::Closed);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limit_keyed_by_user_id() {
        let mut config = config_without_checks();
        config.rate_limit.enabled = true;
        config.rate_limit.max_requests = 1;
        config.rate_limit.key_by_user_id = true;

        let gateway = Gateway::new(config);
        let with_user = |user: &str| {
            Request::builder()
                .uri("/")
                .header("x-user-id", user)
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(gateway.handle_request(client(), with_user("alice")).await.status(), 503);
        assert_eq!(gateway.handle_request(client(), with_user("bob")).await.status(), 503);
        assert_eq!(gateway.handle_request(client(), with_user("alice")).await.status(), 429);
    }

    #[tokio::test]
    async fn test_open_circuit_returns_503_without_selection() {
        let mut config = config_without_checks();
        config.circuit_breaker.failure_threshold = 1;
        config.backends.push(BackendConfig::new("b", "127.0.0.1", 9001));

        let gateway = Gateway::new(config);
        gateway.initialize().await;
        gateway.breakers().for_backend("b").record_failure();

        let response = gateway.handle_request(client(), get("/")).await;
        assert_eq!(response.status(), 503);
        assert_eq!(gateway.load_balancer().get("b").unwrap().total_requests(), 0);
    }

    #[tokio::test]
    async fn test_remove_backend_forgets_unshared_ceiling() {
        let first = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_a = first.local_addr().unwrap().port();
        let port_b = second.local_addr().unwrap().port();
        drop((first, second));

        let mut config = config_without_checks();
        config.backends.push(BackendConfig::new("a", "127.0.0.1", port_a));
        config.backends.push(BackendConfig::new("a-alias", "127.0.0.1", port_a));
        config.backends.push(BackendConfig::new("b", "127.0.0.1", port_b));
        let gateway = Gateway::new(config);
        gateway.initialize().await;

        // Forwards to dead ports still register a ceiling per authority.
        for _ in 0..3 {
            gateway.handle_request(client(), get("/")).await;
        }
        assert_eq!(gateway.transport().tracked_backends(), 2);

        gateway.remove_backend("a");
        assert_eq!(gateway.transport().tracked_backends(), 2);
        gateway.remove_backend("a-alias");
        assert_eq!(gateway.transport().tracked_backends(), 1);
        gateway.remove_backend("b");
        assert_eq!(gateway.transport().tracked_backends(), 0);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_transport_is_not_a_backend_failure() {
        let mut config = config_without_checks();
        config.backends.push(BackendConfig::new("b", "127.0.0.1", 9001));
        let gateway = Gateway::new(config);
        gateway.initialize().await;
        gateway.shutdown().await;

        let response = gateway.handle_request(client(), get("/")).await;
        assert_eq!(response.status(), 503);

        let m = gateway.metrics();
        assert_eq!(m.failed_requests, 0);
        assert_eq!(m.rejected_requests, 1);
        assert_eq!(m.backends[0].total_requests, 0);
        assert_eq!(m.backends[0].active_connections, 0);
        assert_eq!(gateway.breakers().global().unwrap().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_backend_drops_breaker() {
        let mut config = config_without_checks();
        config.circuit_breaker.scope = BreakerScope::PerBackend;
        config.circuit_breaker.failure_threshold = 1;
        config.backends.push(BackendConfig::new("b", "127.0.0.1", 9001));

        let gateway = Gateway::new(config);
        gateway.breakers().for_backend("b").record_failure();
        assert_eq!(gateway.metrics().circuit_breaker_state, CircuitState::Open);

        assert!(gateway.remove_backend("b").is_some());
        assert!(gateway.remove_backend("b").is_none());
        assert_eq!(gateway.metrics().circuit_breaker_state, CircuitState::Closed);
        assert!(gateway.metrics().backends.is_empty());
    }
}
