//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to the gateway at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the backend list changes only through
//!   explicit add/remove calls on the running gateway
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::GatewayConfig;
pub use schema::ListenerConfig;
pub use schema::BackendConfig;
pub use schema::{
    AdminConfig, BreakerScope, CircuitBreakerConfig, HealthCheckConfig, LoadBalancingConfig,
    LogFormat, ObservabilityConfig, RateLimitConfig, StrategyKind, TransportConfig,
};
