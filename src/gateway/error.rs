//! Request-path errors and their HTTP rendering.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::client::UpstreamError;
use crate::security::headers::{self, X_RATELIMIT_RESET};

/// Why a request was not answered by a backend.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client exhausted its rate limit. `reset_at` is in unix seconds.
    #[error("rate limit exceeded")]
    RateLimited { reset_at: Option<u64> },

    #[error("service unavailable")]
    CircuitOpen,

    #[error("no healthy backend")]
    NoHealthyBackend,

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("bad gateway: {0}")]
    Upstream(#[from] UpstreamError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen
            | GatewayError::NoHealthyBackend
            | GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let GatewayError::RateLimited { reset_at: Some(at) } = &self {
            headers::set(&mut headers, X_RATELIMIT_RESET, &at.to_string());
        }
        // Upstream details stay in the logs.
        let body = match &self {
            GatewayError::Upstream(_) => "bad gateway".to_string(),
            other => other.to_string(),
        };
        (self.status(), headers, body).into_response()
    }
}
