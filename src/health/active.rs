//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Update backend health state based on results
//! - Keep running when a cycle fails; stop on shutdown

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::http::client::{HttpClient, build_client};
use crate::load_balancer::{Backend, HealthState, LoadBalancer};
use crate::observability::metrics;

const PROBE_USER_AGENT: &str = concat!("api-gateway-health-check/", env!("CARGO_PKG_VERSION"));

/// Idle time after which pooled probe connections are dropped.
const PROBE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct HealthMonitor {
    balancer: Arc<LoadBalancer>,
    interval: Duration,
    timeout: Duration,
    client: HttpClient,
    permits: Semaphore,
}

impl HealthMonitor {
    pub fn new(balancer: Arc<LoadBalancer>, config: &HealthCheckConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            balancer,
            interval: Duration::from_secs(config.interval_secs),
            timeout,
            client: build_client(timeout, PROBE_IDLE_TIMEOUT, 1),
            permits: Semaphore::new(config.max_concurrent_probes.max(1)),
        }
    }

    /// Probe the pool every interval until shutdown. The first cycle runs one
    /// interval after start; call [`check_all`](Self::check_all) up front to
    /// seed health state.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if AssertUnwindSafe(self.check_all()).catch_unwind().await.is_err() {
                        tracing::error!("Health check cycle panicked, retrying next interval");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every enabled backend once.
    pub async fn check_all(&self) {
        let backends = self.balancer.backends();
        let probes = backends
            .iter()
            .filter(|b| b.enabled)
            .map(|b| self.check_backend(b));
        join_all(probes).await;
    }

    async fn check_backend(&self, backend: &Arc<Backend>) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };

        let previous = backend.health_state();
        let state = self.probe(backend).await;
        backend.set_health(state);
        metrics::record_backend_health(&backend.id, state == HealthState::Healthy);

        if previous != state {
            match state {
                HealthState::Healthy => tracing::info!(
                    backend = %backend.id,
                    from = previous.as_str(),
                    "Backend became healthy"
                ),
                _ => tracing::warn!(
                    backend = %backend.id,
                    from = previous.as_str(),
                    "Backend became unhealthy"
                ),
            }
        }
    }

    /// Issue one probe. Anything but a 200 within the timeout is unhealthy.
    pub async fn probe(&self, backend: &Backend) -> HealthState {
        let uri = format!("{}{}", backend.url(), backend.health_check_path);
        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(header::USER_AGENT, PROBE_USER_AGENT)
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.id, uri = %uri, error = %e, "Failed to build health check request");
                return HealthState::Unhealthy;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => HealthState::Healthy,
            Ok(Ok(response)) => {
                tracing::debug!(backend = %backend.id, status = %response.status(), "Health check failed: unexpected status");
                HealthState::Unhealthy
            }
            Ok(Err(e)) => {
                tracing::debug!(backend = %backend.id, error = %e, "Health check failed: connection error");
                HealthState::Unhealthy
            }
            Err(_) => {
                tracing::debug!(backend = %backend.id, "Health check failed: timeout");
                HealthState::Unhealthy
            }
        }
    }
}
