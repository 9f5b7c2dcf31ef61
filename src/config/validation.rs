//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and referential
//! integrity. Every problem is collected so the operator sees them all at once.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BackendConfig, GatewayConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `backends[1].port`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a whole configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be at least 1"));
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let prefix = format!("backends[{}]", i);
        for err in validate_backend_within(backend, config.listener.request_timeout_secs) {
            errors.push(ValidationError::new(format!("{}.{}", prefix, err.field), err.message));
        }
        if !seen.insert(backend.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", prefix),
                format!("duplicate backend id '{}'", backend.id),
            ));
        }
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be at least 1"));
        }
        if rl.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be at least 1"));
        }
        if rl.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be at least 1"));
        }
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be at least 1"));
    }

    let hc = &config.health_check;
    if hc.enabled {
        if hc.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be at least 1"));
        }
        if hc.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be at least 1"));
        }
        if hc.max_concurrent_probes == 0 {
            errors.push(ValidationError::new("health_check.max_concurrent_probes", "must be at least 1"));
        }
    }

    let tc = &config.transport;
    if tc.max_connections == 0 {
        errors.push(ValidationError::new("transport.max_connections", "must be at least 1"));
    }
    if tc.max_connections_per_backend == 0 {
        errors.push(ValidationError::new("transport.max_connections_per_backend", "must be at least 1"));
    }
    if tc.max_response_body_bytes == 0 {
        errors.push(ValidationError::new("transport.max_response_body_bytes", "must be at least 1"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    let admin = &config.admin;
    if admin.enabled {
        if admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        }
        if admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one backend entry. Field names in the result are relative.
///
/// Also used by the admin API before adding a backend at runtime.
pub fn validate_backend(backend: &BackendConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if backend.id.trim().is_empty() {
        errors.push(ValidationError::new("id", "must not be empty"));
    }
    if backend.host.trim().is_empty() {
        errors.push(ValidationError::new("host", "must not be empty"));
    }
    if backend.port == 0 {
        errors.push(ValidationError::new("port", "must not be 0"));
    }
    if backend.weight == 0 {
        errors.push(ValidationError::new("weight", "must be at least 1"));
    }
    if backend.max_connections == 0 {
        errors.push(ValidationError::new("max_connections", "must be at least 1"));
    }
    if backend.timeout_secs == 0 {
        errors.push(ValidationError::new("timeout_secs", "must be at least 1"));
    }
    if !backend.health_check_path.starts_with('/') {
        errors.push(ValidationError::new("health_check_path", "must start with '/'"));
    }
    errors
}

/// [`validate_backend`] plus the check that the backend's deadline expires
/// before the listener's outer request timeout. A forward cut short by the
/// outer timeout would never be accounted as a failure.
pub fn validate_backend_within(backend: &BackendConfig, request_timeout_secs: u64) -> Vec<ValidationError> {
    let mut errors = validate_backend(backend);
    if backend.timeout_secs > 0 && backend.timeout_secs >= request_timeout_secs {
        errors.push(ValidationError::new(
            "timeout_secs",
            format!(
                "must be below listener.request_timeout_secs ({})",
                request_timeout_secs
            ),
        ));
    }
    errors
}
