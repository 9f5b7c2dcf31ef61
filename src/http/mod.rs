//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, timeout, tracing)
//!     → gateway (admission, breaker, selection)
//!     → client.rs (pooled forward with connection ceilings)
//!     → Send to client
//! ```

pub mod client;
pub mod server;

pub use client::{Transport, UpstreamError};
pub use server::HttpServer;
