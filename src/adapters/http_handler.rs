use std::{net::SocketAddr, sync::Arc, time::{Duration, Instant}};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use hyper::{Request, Response};
use redis::aio::ConnectionManager;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{AuthVerifier, Claims},
    config::{GatewayConfig, LoadBalancerPolicy},
    core::{GatewayService, RateLimiter, parse_service_path, upstream::UpstreamGroup},
    error::GatewayError,
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::ConnectionTracker,
};

/// Headers that are single-hop by definition and never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// The admission pipeline: auth → rate limit → route → proxy.
///
/// `handle_request` is the sole writer of client responses. Every stage may
/// short-circuit into the JSON error envelope; rate-limit headers from an
/// admission decision are applied to the response regardless of the final
/// status. The tracing span wraps the entire pipeline.
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    http_client: Arc<dyn HttpClient>,
    auth: Arc<AuthVerifier>,
    rate_limiter: Option<Arc<RateLimiter>>,
    connection_tracker: Arc<ConnectionTracker>,
    redis: Option<ConnectionManager>,
    config: Arc<GatewayConfig>,
    started_at: Instant,
}

impl HttpHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<GatewayService>,
        http_client: Arc<dyn HttpClient>,
        auth: Arc<AuthVerifier>,
        rate_limiter: Option<Arc<RateLimiter>>,
        connection_tracker: Arc<ConnectionTracker>,
        redis: Option<ConnectionManager>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            gateway,
            http_client,
            auth,
            rate_limiter,
            connection_tracker,
            redis,
            config,
            started_at: Instant::now(),
        }
    }

    /// Main entry point: runs the pipeline under a request span and records
    /// the terminal status and latency.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let start_time = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let request_id = Uuid::new_v4().to_string();
        let client_ip = client_addr.map(|addr| addr.ip().to_string());

        let span = tracing_setup::create_request_span(
            method.as_str(),
            &path,
            &request_id,
            client_ip.as_deref(),
        );

        let mut response = self
            .route_request(req, client_addr)
            .instrument(span.clone())
            .await;

        let duration = start_time.elapsed();
        let status = response.status().as_u16();
        span.record("http.status_code", status);
        span.record("duration_ms", duration.as_millis() as u64);
        tracing::info!(
            parent: &span,
            status,
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        metrics::record_http_request(method.as_str(), &path, status, duration);
        apply_security_headers(response.headers_mut());
        response
    }

    /// Dispatch system endpoints, then the proxied surface.
    async fn route_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        if path == "/health" {
            return self.health_response();
        }
        if path == "/ready" {
            return self.ready_response().await;
        }
        if self.config.observability.metrics_enabled
            && path == self.config.observability.metrics_path
        {
            return self.metrics_response();
        }
        if path == "/v1" || path.starts_with("/v1/") {
            return self.admit_and_proxy(req, client_addr).await;
        }

        tracing::debug!(path = %path, "no route match");
        envelope_response(StatusCode::NOT_FOUND, "Not Found", "Route not found")
    }

    /// Auth, then rate limit, then route parse, then proxy; every stage may
    /// short-circuit with an error envelope.
    async fn admit_and_proxy(
        &self,
        mut req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        // The skip list is consulted before any credential is inspected
        let mut claims: Option<Claims> = None;
        if !self.auth.should_skip(&path) {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            match self.auth.verify(authorization.as_deref()).await {
                Ok(verified) => claims = Some(verified),
                Err(err) => {
                    tracing::warn!(
                        reason = err.reason(),
                        detail = err.detail(),
                        "authentication failed"
                    );
                    metrics::increment_auth_failure(
                        err.reason(),
                        self.auth.auth_type().as_str(),
                    );
                    return error_response(&GatewayError::Unauthorized(err.to_string()));
                }
            }
        }

        // Admission decision. A store error admits the request without
        // headers: availability over strictness.
        let mut limit_headers: Option<Vec<(&'static str, String)>> = None;
        if let Some(limiter) = &self.rate_limiter {
            let key = rate_limit_key(claims.as_ref(), client_addr);
            match limiter.allow(&key).await {
                Ok(info) => {
                    let headers = info.headers();
                    if !info.allowed {
                        metrics::increment_rate_limit_hit(&key, limiter.algorithm());
                        let mut response = error_response(&GatewayError::TooManyRequests(
                            "Rate limit exceeded".to_string(),
                        ));
                        apply_limit_headers(response.headers_mut(), &headers);
                        return response;
                    }
                    limit_headers = Some(headers);
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        key = %key,
                        "rate limiter unavailable, admitting request"
                    );
                }
            }
        }

        // Resolve /<service>/<rest> against the configured groups
        let versioned_path = path.strip_prefix("/v1").unwrap_or(&path);
        let routed = parse_service_path(versioned_path).and_then(|(service, remaining)| {
            self.gateway
                .group(&service)
                .ok_or_else(|| {
                    GatewayError::BadGateway(format!("Upstream service '{service}' not found"))
                })
                .map(|group| (group, remaining))
        });

        let (group, remaining_path) = match routed {
            Ok(parts) => parts,
            Err(err) => {
                let mut response = error_response(&err);
                if let Some(headers) = limit_headers {
                    apply_limit_headers(response.headers_mut(), &headers);
                }
                return response;
            }
        };

        // Claims travel with the request, not in process-wide state
        if let Some(verified) = claims {
            req.extensions_mut().insert(verified);
        }

        let mut response = self.proxy(req, &group, &remaining_path).await;
        if let Some(headers) = limit_headers {
            apply_limit_headers(response.headers_mut(), &headers);
        }
        response
    }

    /// Select a candidate and stream the request to it.
    async fn proxy(
        &self,
        req: Request<AxumBody>,
        group: &UpstreamGroup,
        remaining_path: &str,
    ) -> Response<AxumBody> {
        let Some(target) = self.gateway.select_upstream(group) else {
            return error_response(&GatewayError::ServiceUnavailable(
                "No healthy upstream available".to_string(),
            ));
        };

        let (parts, body) = req.into_parts();

        let target_uri = {
            let base = target.trim_end_matches('/');
            let rest = remaining_path.trim_start_matches('/');
            match parts.uri.query() {
                Some(query) => format!("{base}/{rest}?{query}"),
                None => format!("{base}/{rest}"),
            }
        };
        let uri: hyper::Uri = match target_uri.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(error = %err, uri = %target_uri, "invalid upstream URI");
                return error_response(&GatewayError::Internal(
                    "Failed to build upstream request".to_string(),
                ));
            }
        };

        let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
        for (name, value) in parts.headers.iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }

        let upstream_req = match builder.body(body) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(error = %err, "failed to build upstream request");
                return error_response(&GatewayError::Internal(
                    "Failed to build upstream request".to_string(),
                ));
            }
        };

        // Paired increment/decrement around the dispatch; the guard restores
        // the count on every exit path, including caller disconnect
        let _connections = (self.gateway.policy() == LoadBalancerPolicy::LeastConnections)
            .then(|| self.connection_tracker.track(&target));

        let span = tracing_setup::create_upstream_span(group.name(), &target, parts.method.as_str());
        let dispatch_start = Instant::now();
        let result = self.http_client.send_request(upstream_req).instrument(span).await;
        let duration = dispatch_start.elapsed();

        match result {
            Ok(response) => {
                let status = response.status().as_u16().to_string();
                metrics::increment_upstream_request(group.name(), &status);
                metrics::record_upstream_duration(group.name(), &status, duration);
                tracing::info!(
                    upstream = group.name(),
                    target = %target,
                    status = %status,
                    duration_ms = duration.as_millis() as u64,
                    "upstream response"
                );
                response
            }
            Err(err) => {
                metrics::increment_upstream_request(group.name(), "error");
                metrics::record_upstream_duration(group.name(), "error", duration);
                tracing::error!(
                    error = %err,
                    upstream = group.name(),
                    target = %target,
                    "upstream dispatch failed"
                );
                error_response(&GatewayError::BadGateway(
                    "Failed to connect to upstream".to_string(),
                ))
            }
        }
    }

    fn health_response(&self) -> Response<AxumBody> {
        let body = serde_json::json!({
            "status": "healthy",
            "timestamp": now_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
        });
        json_response(StatusCode::OK, &body)
    }

    async fn ready_response(&self) -> Response<AxumBody> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let ping = tokio::time::timeout(Duration::from_secs(2), async move {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                pong
            })
            .await;

            if !matches!(ping, Ok(Ok(_))) {
                let body = serde_json::json!({
                    "status": "not_ready",
                    "message": "Coordination store connection failed",
                    "timestamp": now_rfc3339(),
                });
                return json_response(StatusCode::SERVICE_UNAVAILABLE, &body);
            }
        }

        let body = serde_json::json!({
            "status": "ready",
            "timestamp": now_rfc3339(),
        });
        json_response(StatusCode::OK, &body)
    }

    fn metrics_response(&self) -> Response<AxumBody> {
        match metrics::render() {
            Ok(rendered) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(AxumBody::from(rendered))
                .unwrap_or_else(|_| fallback_response()),
            Err(err) => {
                tracing::error!(error = %err, "failed to render metrics");
                error_response(&GatewayError::Internal(
                    "Failed to render metrics".to_string(),
                ))
            }
        }
    }
}

/// The rate-limit identity: the authenticated principal when known, else the
/// client address.
fn rate_limit_key(claims: Option<&Claims>, client_addr: Option<SocketAddr>) -> String {
    if let Some(claims) = claims {
        let principal = claims.principal();
        if !principal.is_empty() {
            return format!("principal:{principal}");
        }
    }

    match client_addr {
        Some(addr) => format!("address:{}", addr.ip()),
        None => "address:unknown".to_string(),
    }
}

fn apply_limit_headers(headers: &mut HeaderMap, limit_headers: &[(&'static str, String)]) {
    for (name, value) in limit_headers {
        if let Ok(header_value) = HeaderValue::from_str(value) {
            headers.insert(*name, header_value);
        }
    }
}

fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<AxumBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(body.to_string()))
        .unwrap_or_else(|_| fallback_response())
}

fn envelope_response(status: StatusCode, error: &str, message: &str) -> Response<AxumBody> {
    let body = serde_json::json!({
        "error": error,
        "message": message,
        "code": status.as_u16(),
        "timestamp": now_rfc3339(),
    });
    json_response(status, &body)
}

fn error_response(error: &GatewayError) -> Response<AxumBody> {
    json_response(error.status_code(), &error.envelope())
}

fn fallback_response() -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from("{}"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            http_client: self.http_client.clone(),
            auth: self.auth.clone(),
            rate_limiter: self.rate_limiter.clone(),
            connection_tracker: self.connection_tracker.clone(),
            redis: self.redis.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use super::*;
    use crate::{
        config::UpstreamConfig,
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    /// Upstream stub that records the last request it saw.
    struct RecordingUpstream {
        last_headers: Mutex<Option<HeaderMap>>,
        last_uri: Mutex<Option<String>>,
    }

    impl RecordingUpstream {
        fn new() -> Self {
            Self {
                last_headers: Mutex::new(None),
                last_uri: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HttpClient for RecordingUpstream {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            *self.last_headers.lock().unwrap() = Some(req.headers().clone());
            *self.last_uri.lock().unwrap() = Some(req.uri().to_string());
            Ok(Response::builder()
                .status(200)
                .header("x-upstream", "yes")
                .body(AxumBody::from("pong"))
                .expect("static response"))
        }

        async fn health_check(&self, _url: &str, _timeout_secs: u64) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    struct FailingUpstream;

    #[async_trait]
    impl HttpClient for FailingUpstream {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        }

        async fn health_check(&self, _url: &str, _timeout_secs: u64) -> HttpClientResult<bool> {
            Ok(false)
        }
    }

    fn handler_with(client: Arc<dyn HttpClient>) -> HttpHandler {
        let mut config = GatewayConfig::default();
        config.proxy.upstreams.insert(
            "svcA".to_string(),
            UpstreamConfig {
                urls: vec!["http://backend:3000".to_string()],
                weight: 1,
                health_check: None,
            },
        );
        let config = Arc::new(config);

        let tracker = Arc::new(ConnectionTracker::new());
        let gateway = Arc::new(GatewayService::new(&config.proxy, tracker.clone()).unwrap());

        HttpHandler::new(
            gateway,
            client,
            Arc::new(AuthVerifier::mock()),
            None,
            tracker,
            None,
            config,
        )
    }

    async fn body_json(response: Response<AxumBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<AxumBody> {
        Request::builder()
            .method("GET")
            .uri(path)
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/health"), None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime_seconds"].is_u64());
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_ready_without_store_dependency() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/ready"), None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/metrics"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_unknown_route_envelope() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/nope"), None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn test_proxy_strips_hop_by_hop_headers() {
        let upstream = Arc::new(RecordingUpstream::new());
        let handler = handler_with(upstream.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/v1/svcA/echo?x=1")
            .header("connection", "keep-alive")
            .header("te", "trailers")
            .header("proxy-authorization", "Basic abc")
            .header("x-custom", "kept")
            .body(AxumBody::from("payload"))
            .unwrap();

        let response = handler.handle_request(request, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");

        let seen = upstream.last_headers.lock().unwrap().clone().unwrap();
        assert!(seen.get("connection").is_none());
        assert!(seen.get("te").is_none());
        assert!(seen.get("proxy-authorization").is_none());
        assert_eq!(seen.get("x-custom").unwrap(), "kept");

        let uri = upstream.last_uri.lock().unwrap().clone().unwrap();
        assert_eq!(uri, "http://backend:3000/echo?x=1");
    }

    #[tokio::test]
    async fn test_unknown_service_is_bad_gateway() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/v1/ghost/x"), None).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Bad Gateway");
    }

    #[tokio::test]
    async fn test_malformed_path_is_bad_request() {
        let handler = handler_with(Arc::new(RecordingUpstream::new()));
        let response = handler.handle_request(get("/v1"), None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Invalid path format");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let handler = handler_with(Arc::new(FailingUpstream));
        let response = handler.handle_request(get("/v1/svcA/x"), None).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Failed to connect to upstream");
    }

    #[tokio::test]
    async fn test_rate_limit_key_shapes() {
        let claims = Claims::mock();
        let addr: SocketAddr = "10.0.0.7:1234".parse().unwrap();

        assert_eq!(
            rate_limit_key(Some(&claims), Some(addr)),
            "principal:mock-user-id"
        );
        assert_eq!(rate_limit_key(None, Some(addr)), "address:10.0.0.7");
        assert_eq!(rate_limit_key(None, None), "address:unknown");
    }
}
