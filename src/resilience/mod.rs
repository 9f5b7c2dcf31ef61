//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend tier:
//!     → circuit_breaker.rs (fail fast while open)
//!     → forward with per-backend timeout (transport)
//!     → circuit_breaker.rs (record transport success/failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every forward has a deadline
//! - Only transport failures count against the breaker; upstream error
//!   statuses are answers and pass through
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerSet, CircuitBreaker, CircuitState};
