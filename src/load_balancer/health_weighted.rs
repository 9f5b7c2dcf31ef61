//! Health-weighted load balancing strategy.
//!
//! Every healthy backend starts at 100 points and loses points for latency,
//! errors and connection pressure. The best score wins, so traffic drifts
//! away from a degrading backend long before it is marked unhealthy.

use std::sync::Arc;
use crate::config::StrategyKind;
use crate::load_balancer::{RequestContext, SelectionStrategy, backend::Backend};

const BASE_SCORE: f64 = 100.0;
const MAX_LATENCY_PENALTY: f64 = 50.0;
const MAX_ERROR_PENALTY: f64 = 40.0;
const MAX_UTILIZATION_PENALTY: f64 = 30.0;
const MIN_SCORE: f64 = 1.0;

/// Score from raw inputs: average response time in seconds, error rate in
/// percent and connection utilization in percent.
pub fn score(avg_response_secs: f64, error_rate_percent: f64, utilization_percent: f64) -> f64 {
    let mut score = BASE_SCORE;
    score -= (avg_response_secs * 10.0).clamp(0.0, MAX_LATENCY_PENALTY);
    score -= error_rate_percent.clamp(0.0, MAX_ERROR_PENALTY);
    score -= utilization_percent.clamp(0.0, MAX_UTILIZATION_PENALTY);
    score.max(MIN_SCORE)
}

/// Current score of a backend.
pub fn backend_score(backend: &Backend) -> f64 {
    score(
        backend.avg_response_time(),
        backend.error_rate_percent(),
        backend.utilization_percent(),
    )
}

#[derive(Debug, Default)]
pub struct HealthWeighted;

impl HealthWeighted {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for HealthWeighted {
    fn select(&self, healthy: &[Arc<Backend>], _ctx: &RequestContext) -> Option<Arc<Backend>> {
        // Strictly-greater comparison keeps the earliest backend on ties.
        let mut best: Option<(&Arc<Backend>, f64)> = None;
        for backend in healthy {
            let s = backend_score(backend);
            match best {
                Some((_, top)) if s <= top => {}
                _ => best = Some((backend, s)),
            }
        }
        best.map(|(b, _)| b.clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::HealthWeighted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::load_balancer::test_support::healthy;

    #[test]
    fn test_score_penalties_are_capped() {
        assert_eq!(score(0.0, 0.0, 0.0), 100.0);
        assert_eq!(score(1.0, 0.0, 0.0), 90.0);
        assert_eq!(score(100.0, 0.0, 0.0), 50.0);
        assert_eq!(score(0.0, 25.0, 0.0), 75.0);
        assert_eq!(score(0.0, 100.0, 0.0), 60.0);
        assert_eq!(score(0.0, 0.0, 50.0), 70.0);
        assert_eq!(score(100.0, 100.0, 100.0), MIN_SCORE);
    }

    #[test]
    fn test_score_never_below_floor() {
        for latency in [0.0, 0.5, 5.0, 500.0] {
            for errors in [0.0, 10.0, 100.0] {
                for util in [0.0, 50.0, 1000.0] {
                    assert!(score(latency, errors, util) >= MIN_SCORE);
                }
            }
        }
    }

    #[test]
    fn test_score_is_monotonic() {
        let steps = [0.0, 0.1, 1.0, 2.5, 4.0, 5.0, 10.0, 100.0];
        for pair in steps.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(score(hi, 10.0, 10.0) <= score(lo, 10.0, 10.0));
            assert!(score(1.0, hi * 10.0, 10.0) <= score(1.0, lo * 10.0, 10.0));
            assert!(score(1.0, 10.0, hi * 10.0) <= score(1.0, 10.0, lo * 10.0));
        }
    }

    #[test]
    fn test_prefers_faster_backend() {
        let lb = HealthWeighted::new();
        let slow = healthy("slow", 8080);
        let fast = healthy("fast", 8081);
        slow.record_success(Duration::from_secs(2));
        fast.record_success(Duration::from_millis(50));

        let picked = lb.select(&[slow, fast], &RequestContext::default()).unwrap();
        assert_eq!(picked.id, "fast");
    }

    #[test]
    fn test_prefers_fewer_errors() {
        let lb = HealthWeighted::new();
        let flaky = healthy("flaky", 8080);
        let steady = healthy("steady", 8081);
        flaky.record_failure();
        flaky.record_success(Duration::ZERO);
        steady.record_success(Duration::ZERO);

        let picked = lb.select(&[flaky, steady], &RequestContext::default()).unwrap();
        assert_eq!(picked.id, "steady");
    }

    #[test]
    fn test_tie_goes_to_pool_order() {
        let lb = HealthWeighted::new();
        let picked = lb
            .select(&[healthy("first", 8080), healthy("second", 8081)], &RequestContext::default())
            .unwrap();
        assert_eq!(picked.id, "first");
    }
}
