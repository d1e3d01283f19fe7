// End-to-end admission pipeline tests against a stubbed upstream.
use std::{net::SocketAddr, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Request, Response, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use portico::{
    adapters::HttpHandler,
    auth::AuthVerifier,
    config::{AuthConfig, AuthType, GatewayConfig, UpstreamConfig},
    core::GatewayService,
    metrics,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    utils::ConnectionTracker,
};

const JWT_SECRET: &str = "integration-test-secret";

/// Upstream stub recording the last forwarded request.
struct StubUpstream {
    last_headers: Mutex<Option<HeaderMap>>,
    fail: bool,
}

impl StubUpstream {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            last_headers: Mutex::new(None),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            last_headers: Mutex::new(None),
            fail: true,
        })
    }
}

#[async_trait]
impl HttpClient for StubUpstream {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        *self.last_headers.lock().unwrap() = Some(req.headers().clone());
        if self.fail {
            return Err(HttpClientError::ConnectionError(
                "connection reset".to_string(),
            ));
        }
        Ok(Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(AxumBody::from("upstream says hi"))
            .expect("static response"))
    }

    async fn health_check(&self, _url: &str, _timeout_secs: u64) -> HttpClientResult<bool> {
        Ok(!self.fail)
    }
}

fn gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.auth_type = AuthType::Jwt;
    config.auth.jwt_secret = JWT_SECRET.to_string();
    config.proxy.upstreams.insert(
        "svcA".to_string(),
        UpstreamConfig {
            urls: vec!["http://backend-a:3000".to_string()],
            weight: 1,
            health_check: None,
        },
    );
    config
}

async fn handler(upstream: Arc<StubUpstream>) -> HttpHandler {
    let config = Arc::new(gateway_config());
    let tracker = Arc::new(ConnectionTracker::new());
    let gateway = Arc::new(GatewayService::new(&config.proxy, tracker.clone()).unwrap());

    let auth_config = AuthConfig {
        auth_type: AuthType::Jwt,
        jwt_secret: JWT_SECRET.to_string(),
        ..AuthConfig::default()
    };
    let auth = Arc::new(
        AuthVerifier::from_config(&auth_config, upstream.clone() as Arc<dyn HttpClient>)
            .await
            .unwrap(),
    );

    HttpHandler::new(gateway, upstream, auth, None, tracker, None, config)
}

fn bearer_token() -> String {
    let claims = serde_json::json!({
        "sub": "user-1",
        "user_id": "u-42",
        "email": "user@example.com",
        "roles": ["user"],
        "exp": chrono::Utc::now().timestamp() + 600,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn client_addr() -> SocketAddr {
    "192.0.2.10:50000".parse().unwrap()
}

async fn body_json(response: Response<AxumBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn counter_value(rendered: &str, needle: &str) -> f64 {
    rendered
        .lines()
        .find(|line| line.starts_with(needle))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0)
}

#[tokio::test]
async fn health_check_succeeds_without_credentials() {
    let handler = handler(StubUpstream::ok()).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn unauthenticated_call_gets_envelope_and_metric() {
    let handler = handler(StubUpstream::ok()).await;

    let before = counter_value(
        &metrics::render().unwrap(),
        "auth_failures_total{auth_type=\"jwt\",reason=\"missing_token\"}",
    );

    let request = Request::builder()
        .method("GET")
        .uri("/v1/svcA/ping")
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["code"], 401);
    assert!(body["timestamp"].is_string());

    let after = counter_value(
        &metrics::render().unwrap(),
        "auth_failures_total{auth_type=\"jwt\",reason=\"missing_token\"}",
    );
    assert_eq!(after, before + 1.0);
}

#[tokio::test]
async fn authenticated_call_is_proxied_with_headers_intact() {
    let upstream = StubUpstream::ok();
    let handler = handler(upstream.clone()).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/svcA/ping?q=1")
        .header("authorization", format!("Bearer {}", bearer_token()))
        .header("x-request-context", "round-trips")
        .header("connection", "keep-alive")
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"upstream says hi");

    let forwarded = upstream.last_headers.lock().unwrap().clone().unwrap();
    // Ordinary headers round-trip verbatim; hop-by-hop ones do not
    assert_eq!(forwarded.get("x-request-context").unwrap(), "round-trips");
    assert!(forwarded.get("connection").is_none());
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let handler = handler(StubUpstream::ok()).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/svcA/ping")
        .header("authorization", "Bearer not.a.token")
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway_with_metric() {
    let handler = handler(StubUpstream::failing()).await;

    let before = counter_value(
        &metrics::render().unwrap(),
        "upstream_requests_total{status=\"error\",upstream=\"svcA\"}",
    );

    let request = Request::builder()
        .method("GET")
        .uri("/v1/svcA/ping")
        .header("authorization", format!("Bearer {}", bearer_token()))
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Bad Gateway");

    let after = counter_value(
        &metrics::render().unwrap(),
        "upstream_requests_total{status=\"error\",upstream=\"svcA\"}",
    );
    assert_eq!(after, before + 1.0);
}

#[tokio::test]
async fn unknown_service_maps_to_bad_gateway() {
    let handler = handler(StubUpstream::ok()).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/unknown/ping")
        .header("authorization", format!("Bearer {}", bearer_token()))
        .body(AxumBody::empty())
        .unwrap();
    let response = handler.handle_request(request, Some(client_addr())).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("'unknown' not found")
    );
}
