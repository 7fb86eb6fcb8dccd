//! Handlers served by the gateway itself.

use axum::extract::{MatchedPath, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::AdmissionError;
use crate::ratelimit::Identity;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness and upstream freshness.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.health.is_up() {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "stale" }),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountGroupParams {
    pub account_groups: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdmittedResponse {
    pub route: String,
    pub identity: Option<String>,
    pub authenticated: bool,
    pub account_groups: Vec<String>,
}

/// Describe how an admitted request was identified.
///
/// Requests naming `account_groups` must come from a keyed caller and name
/// only configured groups.
pub async fn admitted(
    State(state): State<AppState>,
    matched: MatchedPath,
    identity: Option<Extension<Identity>>,
    Query(params): Query<AccountGroupParams>,
) -> Result<Json<AdmittedResponse>, AdmissionError> {
    let identity = identity.map(|Extension(identity)| identity);
    let account_groups = match &identity {
        Some(identity) => state
            .limiter
            .resolver()
            .authorize_account_groups(identity, params.account_groups.as_deref())?,
        None if params.account_groups.is_some() => {
            return Err(AdmissionError::Forbidden(
                "account groups require a valid API key".to_string(),
            ));
        }
        None => Vec::new(),
    };

    Ok(Json(AdmittedResponse {
        route: matched.as_str().to_string(),
        identity: identity.map(|i| i.to_string()),
        authenticated: identity.is_some_and(|i| i.is_api_key()),
        account_groups,
    }))
}
