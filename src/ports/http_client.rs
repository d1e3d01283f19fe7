use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the request exceeds its deadline
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// Error when the request cannot be constructed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to
/// upstream services. The proxy engine, the health probe and the OIDC key
/// fetcher all dispatch through this trait so tests can substitute a mock.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to an upstream server, streaming the body both
    /// ways. Cancellation propagates: dropping the returned future aborts the
    /// in-flight upstream call.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe a URL for liveness. Returns `Ok(true)` iff the endpoint answers
    /// 200 within `timeout_secs`; connection failures are `Ok(false)`.
    async fn health_check(&self, url: &str, timeout_secs: u64) -> HttpClientResult<bool>;
}
