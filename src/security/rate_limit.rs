//! Per-client sliding-window rate limiting.
//!
//! Each client identifier (IP address or user id) maps to the timestamps of
//! its admitted requests inside the trailing window. An admission check
//! prunes expired timestamps, compares the remainder against the limit and
//! records the new request, all under the map shard lock for that key.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::RateLimitConfig;

/// Sliding-window rate limiter keyed by client identifier.
#[derive(Debug)]
pub struct RateLimiter {
    requests: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one request from `identifier`.
    ///
    /// Rejected requests are not recorded.
    pub fn is_allowed(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.requests.entry(identifier.to_string()).or_default();
        let timestamps = entry.value_mut();

        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Time until the oldest request inside the window expires.
    ///
    /// `None` when the identifier has no request inside the window.
    pub fn time_until_reset(&self, identifier: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.requests.get(identifier)?;
        let oldest = entry
            .iter()
            .find(|&&at| now.duration_since(at) < self.window)?;
        Some((*oldest + self.window).saturating_duration_since(now))
    }

    /// Wall-clock moment at which the identifier regains a request slot.
    pub fn reset_time(&self, identifier: &str) -> Option<SystemTime> {
        self.time_until_reset(identifier)
            .map(|remaining| SystemTime::now() + remaining)
    }

    /// [`reset_time`](Self::reset_time) as whole unix seconds.
    pub fn reset_unix_secs(&self, identifier: &str) -> Option<u64> {
        self.reset_time(identifier)
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }

    /// Drop identifiers with no request inside the window. Returns how many
    /// were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, timestamps| {
            timestamps
                .back()
                .map(|&newest| now.duration_since(newest) < self.window)
                .unwrap_or(false)
        });
        before.saturating_sub(self.requests.len())
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

/// Periodically evict idle identifiers until shutdown.
pub async fn run_sweeper(
    limiter: Arc<RateLimiter>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(every);
    // The first tick completes immediately; there is nothing to sweep yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = limiter.sweep();
                if evicted > 0 {
                    tracing::debug!(
                        evicted,
                        remaining = limiter.tracked_clients(),
                        "Evicted idle rate limit entries"
                    );
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Rate limit sweeper stopping");
                break;
            }
        }
    }
}
