//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request → RequestContext (client IP, user id)
//!     → pool.rs (snapshot backends, keep only healthy ones)
//!     → Apply the configured strategy:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - weighted.rs (rotate through a weight-expanded list)
//!         - hash.rs (digest of user id / client IP)
//!         - health_weighted.rs (score latency, errors, utilization)
//!     → Return backend or None
//! ```
//!
//! # Design Decisions
//! - Strategies only ever see healthy backends, in pool order
//! - Pool mutations swap a new snapshot; in-flight selections keep theirs
//! - One strategy per pool, so rotation cursors are pool-global

pub mod backend;
pub mod hash;
pub mod health_weighted;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;

use crate::config::StrategyKind;

pub use backend::{Backend, BackendConnectionGuard, BackendStats, HealthState};
pub use pool::{LoadBalancer, PoolError};

/// Routing inputs extracted from an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    pub fn new(client_ip: Option<String>, user_id: Option<String>) -> Self {
        Self { client_ip, user_id }
    }
}

/// A backend selection algorithm.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Pick one of `healthy`. The slice is never empty and is in pool order.
    fn select(&self, healthy: &[Arc<Backend>], ctx: &RequestContext) -> Option<Arc<Backend>>;

    /// Config name of the strategy.
    fn kind(&self) -> StrategyKind;
}

/// Build the strategy named in config.
pub fn build_strategy(kind: StrategyKind) -> Box<dyn SelectionStrategy> {
    match kind {
        StrategyKind::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        StrategyKind::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        StrategyKind::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        StrategyKind::HashBased => Box::new(hash::HashBased::new()),
        StrategyKind::HealthWeighted => Box::new(health_weighted::HealthWeighted::new()),
    }
}
