//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Snapshot the pool
//!     → Probe every enabled backend concurrently (bounded)
//!     → Store Healthy/Unhealthy on the backend
//! ```
//!
//! # Design Decisions
//! - A single probe decides the state; there is no flap damping
//! - Only HTTP 200 counts as healthy
//! - Health state is per-backend, not per-pool
//! - Probes use their own connection pool, separate from forwarded traffic

pub mod active;

pub use active::HealthMonitor;
