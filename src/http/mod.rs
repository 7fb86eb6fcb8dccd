//! HTTP surface: admission and logging middleware, and the gateway's own
//! routes.

mod logging;
mod middleware;
mod response;
mod routes;
mod server;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::health::ServiceHealth;
use crate::ratelimit::RateLimiter;

pub use logging::{request_logging_middleware, REQUEST_ID_HEADER};
pub use middleware::{admission_middleware, client_ip, API_KEY_HEADER, CLIENT_IP_HEADER};
pub use response::{apply_headers, ErrorBody, EMERGENCY_RETRY_AFTER_SECS};
pub use routes::{admitted, health, AdmittedResponse, HealthResponse};
pub use server::HttpServer;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub health: ServiceHealth,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, health: ServiceHealth) -> Self {
        Self { limiter, health }
    }
}

/// Put admission in front of `api`, the routes the gateway protects.
///
/// Admission is a route layer so it sees the matched route template.
pub fn protect(api: Router<AppState>, state: AppState) -> Router {
    api.route("/health", get(health))
        .route_layer(from_fn_with_state(state.clone(), admission_middleware))
        .layer(from_fn(request_logging_middleware))
        .with_state(state)
}

/// The gateway's demonstration router: every route answers with how the
/// request was admitted.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/builds", get(admitted))
        .route("/v1/active-matches", get(admitted))
        .route("/v1/matches/{match_id}/metadata", get(admitted))
        .route("/v1/players/{account_id}/match-history", get(admitted))
        .route("/v2/players/{account_id}/match-history", get(admitted));
    protect(api, state)
}
