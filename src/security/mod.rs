//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client sliding window)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Pass to backend selection
//! ```
//!
//! # Design Decisions
//! - Rejected requests never touch the breaker or the backend pool
//! - No trust in client-supplied forwarding headers

pub mod headers;
pub mod rate_limit;

pub use rate_limit::RateLimiter;
