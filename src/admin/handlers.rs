use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::{BackendConfig, BreakerScope, StrategyKind, validation};
use crate::gateway::GatewayMetrics;
use crate::load_balancer::{BackendStats, PoolError};

/// Admin API failures, rendered as `{"error": ..., "details": [...]}`.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("invalid backend entry")]
    InvalidBackend(Vec<String>),

    #[error("backend '{0}' already exists")]
    Conflict(String),

    #[error("backend '{0}' not found")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidBackend(_) => StatusCode::BAD_REQUEST,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let error = self.to_string();
        let details = match self {
            AdminError::InvalidBackend(details) => details,
            _ => Vec::new(),
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}

impl From<PoolError> for AdminError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::DuplicateId(id) => AdminError::Conflict(id),
        }
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub running: bool,
    pub strategy: StrategyKind,
    pub breaker_scope: BreakerScope,
    pub backends: usize,
    pub healthy_backends: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let gateway = &state.gateway;
    let lb = gateway.load_balancer();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        running: gateway.is_running(),
        strategy: lb.strategy(),
        breaker_scope: gateway.breakers().scope(),
        backends: lb.backends().len(),
        healthy_backends: lb.healthy_backends().len(),
    })
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<GatewayMetrics> {
    Json(state.gateway.metrics())
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStats>> {
    let backends = state.gateway.load_balancer().backends();
    Json(backends.iter().map(|b| b.stats()).collect())
}

pub async fn add_backend(
    State(state): State<AdminState>,
    Json(config): Json<BackendConfig>,
) -> Result<(StatusCode, Json<BackendStats>), AdminError> {
    let request_timeout = state.gateway.config().listener.request_timeout_secs;
    let errors = validation::validate_backend_within(&config, request_timeout);
    if !errors.is_empty() {
        return Err(AdminError::InvalidBackend(
            errors.iter().map(ToString::to_string).collect(),
        ));
    }

    let backend = state.gateway.add_backend(&config)?;
    tracing::info!(backend = %backend.id, "Backend added via admin API");
    Ok((StatusCode::CREATED, Json(backend.stats())))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    match state.gateway.remove_backend(&id) {
        Some(_) => {
            tracing::info!(backend = %id, "Backend removed via admin API");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AdminError::NotFound(id)),
    }
}
