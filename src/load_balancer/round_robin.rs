//! Round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::config::StrategyKind;
use crate::load_balancer::{RequestContext, SelectionStrategy, backend::Backend};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends. The counter is
/// never reset, so indices shift when the healthy set changes size.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, healthy: &[Arc<Backend>], _ctx: &RequestContext) -> Option<Arc<Backend>> {
        if healthy.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[index].clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }
}
