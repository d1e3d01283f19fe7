//! Client-facing error kinds for the admission pipeline.
//!
//! Component-local failures are converted to one of these kinds at the
//! pipeline boundary; the pipeline is the sole writer of client responses.
//! Each kind renders as the standard JSON error envelope
//! `{error, message, code, timestamp}` with a fixed short message, so
//! internal fault detail never leaks to callers.
use axum::http::StatusCode;
use thiserror::Error;

/// Errors the gateway itself reports to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// Malformed path or header: 400
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid credential: 401
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but lacking a required role: 403
    #[error("{0}")]
    Forbidden(String),

    /// Admission denied by the rate limiter: 429
    #[error("{0}")]
    TooManyRequests(String),

    /// Upstream dispatch failure or unknown service: 502
    #[error("{0}")]
    BadGateway(String),

    /// No candidate URL or failing readiness: 503
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Misconfigured pipeline or script contract violation: 500
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Canonical short name used for the envelope's `error` field.
    pub fn short(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "Bad Request",
            GatewayError::Unauthorized(_) => "Unauthorized",
            GatewayError::Forbidden(_) => "Forbidden",
            GatewayError::TooManyRequests(_) => "Too Many Requests",
            GatewayError::BadGateway(_) => "Bad Gateway",
            GatewayError::ServiceUnavailable(_) => "Service Unavailable",
            GatewayError::Internal(_) => "Internal Server Error",
        }
    }

    /// Envelope body for this error, timestamped now (RFC 3339, UTC).
    pub fn envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.short(),
            "message": self.to_string(),
            "code": self.status_code().as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::TooManyRequests("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::ServiceUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = GatewayError::Unauthorized("Missing Authorization header".into()).envelope();
        assert_eq!(envelope["error"], "Unauthorized");
        assert_eq!(envelope["message"], "Missing Authorization header");
        assert_eq!(envelope["code"], 401);
        assert!(envelope["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
