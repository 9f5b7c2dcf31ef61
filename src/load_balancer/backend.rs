//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections and health predicates)
//! - Track request outcomes and recent response times
//! - Track health state (Unknown/Healthy/Unhealthy)
//!
//! Counters mutated on the request path are atomics. The response-time ring
//! and the health-check timestamp each have their own lock, so the health
//! checker never contends with request accounting.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BackendConfig;

/// Number of response-time samples kept per backend.
pub const RESPONSE_TIME_WINDOW: usize = 100;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Repetitions in the weighted round-robin rotation.
    pub weight: u32,
    /// Connection count at which the backend stops being selectable.
    pub max_connections: usize,
    /// Forward timeout.
    pub timeout: Duration,
    pub health_check_path: String,
    pub enabled: bool,

    /// Pre-calculated base URL, `http://host:port`.
    base_url: String,

    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    response_times: Mutex<VecDeque<f64>>,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
}

impl Backend {
    /// Create a new backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            weight: config.weight.max(1),
            max_connections: config.max_connections,
            timeout: Duration::from_secs(config.timeout_secs),
            health_check_path: config.health_check_path.clone(),
            enabled: config.enabled,
            base_url: format!("http://{}:{}", config.host, config.port),
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_TIME_WINDOW)),
            state: AtomicU8::new(HealthState::Unknown as u8),
            last_health_check: Mutex::new(None),
        }
    }

    /// Base URL of the backend, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// `host:port`, used for per-backend transport limits.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_connections(&self) {
        // Never wraps below zero.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Count one in-flight forward. The count drops when the guard does.
    ///
    /// This is bookkeeping for selection, not an admission gate; a backend at
    /// `max_connections` simply stops being selected.
    pub fn connection_guard(self: &Arc<Self>) -> BackendConnectionGuard {
        self.inc_connections();
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Record a completed forward and its latency.
    pub fn record_success(&self, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.response_times.lock();
        if samples.len() == RESPONSE_TIME_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64());
    }

    /// Record a forward that failed at the transport level.
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed share of all forwards, in percent. 0 when nothing was forwarded.
    pub fn error_rate_percent(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.failed_requests() as f64 / total as f64 * 100.0
    }

    /// Mean of the recent response-time samples in seconds. 0 when empty.
    pub fn avg_response_time(&self) -> f64 {
        let samples = self.response_times.lock();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Active connections as a percentage of `max_connections`.
    pub fn utilization_percent(&self) -> f64 {
        if self.max_connections == 0 {
            return 100.0;
        }
        self.active_connections() as f64 / self.max_connections as f64 * 100.0
    }

    // --- Health Logic ---

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Store the result of a health probe and stamp the check time.
    pub fn set_health(&self, state: HealthState) {
        self.state.store(state as u8, Ordering::Relaxed);
        *self.last_health_check.lock() = Some(Utc::now());
    }

    /// Overwrite the health state without counting it as a probe.
    pub(crate) fn force_health(&self, state: HealthState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *self.last_health_check.lock()
    }

    /// Selectable: enabled, last probe healthy, and below its connection cap.
    pub fn is_healthy(&self) -> bool {
        self.enabled
            && self.health_state() == HealthState::Healthy
            && self.active_connections() < self.max_connections
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            id: self.id.clone(),
            url: self.base_url.clone(),
            enabled: self.enabled,
            health_status: self.health_state(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests(),
            error_rate_percent: self.error_rate_percent(),
            avg_response_time_seconds: self.avg_response_time(),
            last_health_check: self.last_health_check(),
        }
    }
}

/// Point-in-time view of one backend for the metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub id: String,
    pub url: String,
    pub enabled: bool,
    pub health_status: HealthState,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub avg_response_time_seconds: f64,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
