//! Admin API.
//!
//! Served on its own listener and guarded by a bearer token.
//!
//! ```text
//! GET    /admin/status         version and running flag
//! GET    /admin/metrics        gateway metrics snapshot
//! GET    /admin/backends       per-backend stats
//! POST   /admin/backends       add a backend (JSON backend entry)
//! DELETE /admin/backends/{id}  remove a backend
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get},
};

use crate::gateway::Gateway;

use self::auth::admin_auth_middleware;
use self::handlers::*;

pub use handlers::AdminError;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(gateway: Arc<Gateway>, api_key: &str) -> Self {
        Self {
            gateway,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/backends", get(get_backends).post(add_backend))
        .route("/admin/backends/{id}", delete(remove_backend))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
