//! Weighted round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::config::StrategyKind;
use crate::load_balancer::{RequestContext, SelectionStrategy, backend::Backend};

/// Expands the healthy list so each backend appears `weight` times, then
/// rotates through it with a shared cursor.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for WeightedRoundRobin {
    fn select(&self, healthy: &[Arc<Backend>], _ctx: &RequestContext) -> Option<Arc<Backend>> {
        let total: usize = healthy.iter().map(|b| b.weight.max(1) as usize).sum();
        if total == 0 {
            return None;
        }

        // Walk the cumulative weights instead of materializing the expanded list.
        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for backend in healthy {
            let weight = backend.weight.max(1) as usize;
            if slot < weight {
                return Some(backend.clone());
            }
            slot -= weight;
        }
        None
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::WeightedRoundRobin
    }
}
