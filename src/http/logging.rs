//! Per-request logging.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Response header carrying the request's id.
pub const REQUEST_ID_HEADER: &str = "x-api-request-id";

/// Tag every request with an id and log it once the response is ready.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        failed = status.is_client_error() || status.is_server_error(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
