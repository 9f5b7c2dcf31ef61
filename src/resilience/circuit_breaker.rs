//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend tier assumed down, requests fail fast
//! - Half-Open: probe traffic allowed to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (consecutive)
//! Open → Half-Open: first check after recovery_timeout has elapsed
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker for the whole pool by default; `per_backend` scope keys
//!   one breaker per backend id
//! - Every check-then-transition runs under a single lock
//! - Uses Tokio's clock so paused-time tests can drive recovery

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{BreakerScope, CircuitBreakerConfig};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Label used in logs and metrics.
    name: String,
    inner: Mutex<Inner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            success_threshold: config.success_threshold.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request may proceed. May move Open → Half-Open.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    self.transitioned(CircuitState::HalfOpen);
                }
                recovered
            }
        }
    }

    /// Record a request that reached the backend tier and got an answer.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    self.transitioned(CircuitState::Closed);
                }
            }
            // A straggler that started before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a transport-level failure.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    self.transitioned(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.success_count = 0;
                inner.state = CircuitState::Open;
                self.transitioned(CircuitState::Open);
            }
            CircuitState::Open => inner.failure_count = inner.failure_count.saturating_add(1),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    fn transitioned(&self, to: CircuitState) {
        match to {
            CircuitState::Open => tracing::warn!(breaker = %self.name, "Circuit breaker opened"),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, allowing probe traffic")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, "Circuit breaker closed"),
        }
        metrics::record_breaker_transition(&self.name, to.as_str());
    }
}

/// The gateway's breakers, according to the configured scope.
#[derive(Debug)]
pub enum BreakerSet {
    /// One breaker checked before backend selection.
    Global(Arc<CircuitBreaker>),
    /// One breaker per backend id, created on first use.
    PerBackend {
        config: CircuitBreakerConfig,
        breakers: DashMap<String, Arc<CircuitBreaker>>,
    },
}

impl BreakerSet {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        match config.scope {
            BreakerScope::Global => BreakerSet::Global(Arc::new(CircuitBreaker::new("global", config))),
            BreakerScope::PerBackend => BreakerSet::PerBackend {
                config: config.clone(),
                breakers: DashMap::new(),
            },
        }
    }

    pub fn scope(&self) -> BreakerScope {
        match self {
            BreakerSet::Global(_) => BreakerScope::Global,
            BreakerSet::PerBackend { .. } => BreakerScope::PerBackend,
        }
    }

    /// The pool-wide breaker, when running with global scope.
    pub fn global(&self) -> Option<&Arc<CircuitBreaker>> {
        match self {
            BreakerSet::Global(b) => Some(b),
            BreakerSet::PerBackend { .. } => None,
        }
    }

    /// The breaker that accounts for requests sent to `backend_id`.
    pub fn for_backend(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        match self {
            BreakerSet::Global(b) => b.clone(),
            BreakerSet::PerBackend { config, breakers } => breakers
                .entry(backend_id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(backend_id, config)))
                .clone(),
        }
    }

    /// Forget the breaker of a removed backend.
    pub fn remove_backend(&self, backend_id: &str) {
        if let BreakerSet::PerBackend { breakers, .. } = self {
            breakers.remove(backend_id);
        }
    }

    /// Global state, or the most severe per-backend state.
    pub fn overall_state(&self) -> CircuitState {
        match self {
            BreakerSet::Global(b) => b.state(),
            BreakerSet::PerBackend { breakers, .. } => breakers
                .iter()
                .map(|entry| entry.value().state())
                .max()
                .unwrap_or(CircuitState::Closed),
        }
    }

    /// Per-backend states; empty with global scope.
    pub fn backend_states(&self) -> BTreeMap<String, CircuitState> {
        match self {
            BreakerSet::Global(_) => BTreeMap::new(),
            BreakerSet::PerBackend { breakers, .. } => breakers
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().state()))
                .collect(),
        }
    }
}
