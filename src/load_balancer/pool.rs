//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered set of backends
//! - Apply the configured strategy over the healthy subset
//! - Add and remove backends at runtime without disturbing in-flight selections

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::{BackendConfig, StrategyKind};
use crate::load_balancer::{
    build_strategy, RequestContext, SelectionStrategy,
    backend::Backend,
};

/// Errors from pool mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("backend '{0}' already exists")]
    DuplicateId(String),
}

/// Owns the backend pool and selects a backend per request.
#[derive(Debug)]
pub struct LoadBalancer {
    /// Insertion-ordered backends. Readers take a snapshot, writers swap.
    backends: ArcSwap<Vec<Arc<Backend>>>,
    /// Serializes writers so read-modify-swap cannot lose an update.
    write_lock: Mutex<()>,
    strategy: Box<dyn SelectionStrategy>,
}

impl LoadBalancer {
    /// Create an empty pool.
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            backends: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            strategy: build_strategy(kind),
        }
    }

    /// Create a pool from configuration entries, keeping their order.
    pub fn from_config(configs: &[BackendConfig], kind: StrategyKind) -> Self {
        let lb = Self::new(kind);
        for config in configs {
            if let Err(e) = lb.add_config(config) {
                tracing::warn!(backend = %config.id, error = %e, "Skipping backend");
            }
        }
        lb
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Append a backend to the pool.
    pub fn add(&self, backend: Arc<Backend>) -> Result<(), PoolError> {
        let _guard = self.write_lock.lock();
        let current = self.backends.load_full();
        if current.iter().any(|b| b.id == backend.id) {
            return Err(PoolError::DuplicateId(backend.id.clone()));
        }

        tracing::info!(backend = %backend.id, url = %backend.url(), "Added backend server");
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(backend);
        self.backends.store(Arc::new(next));
        Ok(())
    }

    /// Build a backend from config and append it.
    pub fn add_config(&self, config: &BackendConfig) -> Result<Arc<Backend>, PoolError> {
        let backend = Arc::new(Backend::from_config(config));
        self.add(backend.clone())?;
        Ok(backend)
    }

    /// Remove a backend by id. Returns the removed backend, if any.
    ///
    /// Requests already holding the backend finish normally.
    pub fn remove(&self, id: &str) -> Option<Arc<Backend>> {
        let _guard = self.write_lock.lock();
        let current = self.backends.load_full();
        let removed = current.iter().find(|b| b.id == id).cloned()?;

        let next: Vec<_> = current.iter().filter(|b| b.id != id).cloned().collect();
        self.backends.store(Arc::new(next));
        tracing::info!(backend = %id, "Removed backend server");
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.load().iter().find(|b| b.id == id).cloned()
    }

    /// Snapshot of all backends in pool order (for health checking and metrics).
    pub fn backends(&self) -> Arc<Vec<Arc<Backend>>> {
        self.backends.load_full()
    }

    /// Backends currently passing the health predicate, in pool order.
    pub fn healthy_backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .load()
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect()
    }

    /// Select a backend for a request. `None` when no backend is healthy.
    pub fn select(&self, ctx: &RequestContext) -> Option<Arc<Backend>> {
        let healthy = self.healthy_backends();
        if healthy.is_empty() {
            tracing::debug!(backend_count = self.backends.load().len(), "No healthy backends found");
            return None;
        }
        self.strategy.select(&healthy, ctx)
    }
}
