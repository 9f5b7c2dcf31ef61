//! Least Connections load balancing strategy.

use std::sync::Arc;
use crate::config::StrategyKind;
use crate::load_balancer::{RequestContext, SelectionStrategy, backend::Backend};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn select(&self, healthy: &[Arc<Backend>], _ctx: &RequestContext) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability)
        healthy
            .iter()
            .min_by_key(|b| b.active_connections())
            .cloned()
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastConnections
    }
}
