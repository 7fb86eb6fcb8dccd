//! Admission middleware.

use axum::extract::{ConnectInfo, MatchedPath, Query, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::response::apply_headers;
use super::AppState;
use crate::ratelimit::AdmissionRequest;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header carrying the client address set by the CDN in front of the gateway.
pub const CLIENT_IP_HEADER: &str = "CF-Connecting-IP";

#[derive(Debug, Default, Deserialize)]
struct CredentialParams {
    api_key: Option<String>,
}

/// The API key from the header, else from the `api_key` query parameter.
fn api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            Query::<CredentialParams>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(params)| params.api_key)
        })
}

/// The client address from the CDN header, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    headers
        .get(CLIENT_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Admit or reject every request of the routes it is layered on.
///
/// Admitted requests carry their [`Identity`](crate::ratelimit::Identity) in
/// the request extensions, and their responses carry the tightest window's
/// rate-limit headers.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_ip(request.headers(), peer);
    let api_key = api_key(&request);

    let admission = state
        .limiter
        .check(&AdmissionRequest {
            path: &path,
            route: route.as_deref(),
            api_key: api_key.as_deref(),
            client_ip,
        })
        .await;

    let admission = match admission {
        Ok(admission) => admission,
        Err(rejection) => return rejection.into_response(),
    };

    if let Some(identity) = admission.identity() {
        request.extensions_mut().insert(*identity);
    }

    let mut response = next.run(request).await;
    if let Some(headers) = admission.decision().and_then(|d| d.headers()) {
        apply_headers(response.headers_mut(), &headers);
    }
    response
}
