//! HTTP rendering of admission outcomes.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::error::AdmissionError;
use crate::ratelimit::{rate_limit_headers, HEADER_RETRY_AFTER};

/// Seconds an emergency-mode rejection asks the client to wait.
pub const EMERGENCY_RETRY_AFTER_SECS: u64 = 60;

/// JSON body of every rejection.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ErrorBody {
    fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

/// Copy header pairs into a response, skipping pairs that are not valid
/// header text.
pub fn apply_headers<'a>(
    headers: &mut HeaderMap,
    pairs: impl IntoIterator<Item = &'a (&'static str, String)>,
) {
    for (name, value) in pairs {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, value = %value, "Skipping invalid header"),
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::RateLimited(status) => {
                let body = ErrorBody::new(
                    "rate_limit_exceeded",
                    "Rate limit exceeded, please check the headers for more information.",
                );
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                apply_headers(response.headers_mut(), &rate_limit_headers(&status));
                response
            }
            AdmissionError::EmergencyMode => {
                let body = ErrorBody::new(
                    "emergency_mode",
                    "The API is in emergency mode, a valid API key is required.",
                );
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
                apply_headers(
                    response.headers_mut(),
                    &[(HEADER_RETRY_AFTER, EMERGENCY_RETRY_AFTER_SECS.to_string())],
                );
                response
            }
            AdmissionError::Forbidden(reason) => {
                (StatusCode::FORBIDDEN, Json(ErrorBody::new("forbidden", reason))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{TierKind, WindowStatus};
    use crate::store::CounterKey;
    use std::time::Duration;

    #[test]
    fn test_rate_limited_response() {
        let status = WindowStatus {
            key: CounterKey::new("192.0.2.1", "/v1/builds"),
            kind: TierKind::Anonymous,
            observed: 21,
            limit: 20,
            window: Duration::from_secs(10),
            oldest_event: Some(100.0),
            now: 103.2,
        };
        let response = AdmissionError::RateLimited(Box::new(status)).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["ratelimit-limit"], "20");
        assert_eq!(headers["ratelimit-period"], "10");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "7");
        assert_eq!(headers["retry-after"], "7");
    }

    #[test]
    fn test_emergency_response() {
        let response = AdmissionError::EmergencyMode.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["retry-after"], "60");
    }

    #[test]
    fn test_forbidden_response() {
        let response = AdmissionError::Forbidden("no".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
