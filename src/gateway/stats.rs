//! Gateway-level request accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::load_balancer::BackendStats;
use crate::resilience::CircuitState;

/// Counters for forwarded requests.
///
/// `total = successful + failed`; requests turned away before forwarding are
/// counted separately.
#[derive(Debug, Default)]
pub struct GatewayStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_response_micros: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
}

impl GatewayStats {
    pub fn record_success(&self, elapsed: Duration) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.record_forward(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_forward(elapsed);
    }

    fn record_forward(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_response_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// A request refused with 429.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// A request refused with 503 (open circuit or empty pool).
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Percentage of forwards that got an upstream response. 0 when idle.
    pub fn success_rate_percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.successful() as f64 / total as f64 * 100.0
    }

    /// Mean forward time in seconds. 0 when idle.
    pub fn average_response_time(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.total_response_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0 / total as f64
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub rejected_requests: u64,
    pub success_rate_percent: f64,
    pub average_response_time_seconds: f64,
    pub circuit_breaker_state: CircuitState,
    pub backends: Vec<BackendStats>,
}
