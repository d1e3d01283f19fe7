//! Configuration data structures for Portico.
//!
//! These types map directly to the environment (and an optional TOML / YAML /
//! JSON file for upstream group definitions). They are intentionally
//! serde-friendly and include defaults so that minimal deployments remain
//! concise.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8080
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_write_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    120
}

/// HTTP listener configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind on all interfaces
    pub port: u16,
    /// Read timeout for client requests, in seconds
    pub read_timeout_secs: u64,
    /// Write timeout for client responses, in seconds
    pub write_timeout_secs: u64,
    /// Keep-alive idle timeout for client connections, in seconds
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Coordination store (Redis) configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Number of retries the connection manager performs per command
    pub max_retries: usize,
    /// Timeout for establishing a connection, in seconds
    pub connection_timeout_secs: u64,
    /// Timeout for a single command round trip, in seconds
    pub response_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_retries: 3,
            connection_timeout_secs: 5,
            response_timeout_secs: 3,
        }
    }
}

/// Supported authentication strategies.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Preshared-secret HMAC bearer tokens
    Jwt,
    /// OpenID Connect ID tokens verified against the issuer's published keys
    Oidc,
    /// Try `jwt` first, fall back to `oidc`
    Both,
    /// Always accept with synthetic claims (test-only)
    Mock,
}

impl AuthType {
    /// Stable string form used for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Jwt => "jwt",
            AuthType::Oidc => "oidc",
            AuthType::Both => "both",
            AuthType::Mock => "mock",
        }
    }
}

fn default_skip_auth_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}

/// Authentication configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// Verification strategy
    pub auth_type: AuthType,
    /// Preshared secret for HMAC verification (`jwt` / `both`)
    pub jwt_secret: String,
    /// OIDC issuer base URL (`oidc` / `both`)
    pub oidc_issuer: String,
    /// Expected audience for OIDC ID tokens
    pub oidc_client_id: String,
    /// Paths that bypass authentication entirely
    pub skip_auth_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: AuthType::Both,
            jwt_secret: String::new(),
            oidc_issuer: String::new(),
            oidc_client_id: String::new(),
            skip_auth_paths: default_skip_auth_paths(),
        }
    }
}

/// Supported rate limiting algorithms.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    LeakyBucket,
    SlidingWindow,
}

impl RateLimitAlgorithm {
    /// Stable string form used for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::TokenBucket => "token_bucket",
            RateLimitAlgorithm::LeakyBucket => "leaky_bucket",
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
        }
    }
}

/// Rate limiting configuration.
///
/// `bucket_size` doubles as the sliding-window request limit and
/// `refill_rate` as the leaky-bucket drain rate, mirroring the single knob
/// set shared by all three algorithms.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Master switch; when false no limiter runs and no headers are emitted
    pub enabled: bool,
    /// Admission algorithm
    pub algorithm: RateLimitAlgorithm,
    /// Bucket size / capacity / window limit
    pub bucket_size: i64,
    /// Refill rate / leak rate in requests per second
    pub refill_rate: i64,
    /// Sliding window width in seconds
    pub window_size_secs: u64,
    /// Namespace prefix for coordination-store keys
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            bucket_size: 100,
            refill_rate: 10,
            window_size_secs: 60,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Supported upstream selection policies.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerPolicy {
    RoundRobin,
    LeastConnections,
    Weighted,
}

/// Health probe configuration for an upstream group.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthCheckConfig {
    /// Probe path appended to each candidate URL (e.g. "/health")
    pub path: String,
    /// Seconds between probe rounds
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    /// Per-probe deadline in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_weight() -> u32 {
    1
}

/// A named set of interchangeable upstream endpoints.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Ordered candidate URLs
    pub urls: Vec<String>,
    /// Weight applied to every URL of the group under the `weighted` policy
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Optional liveness probe; when absent all URLs are considered routable
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

/// Reverse proxy configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream groups keyed by service name (the first path segment)
    pub upstreams: HashMap<String, UpstreamConfig>,
    /// Upstream selection policy
    pub load_balancer: LoadBalancerPolicy,
    /// Per-request deadline for upstream dispatch, in seconds
    pub timeout_secs: u64,
    /// Maximum idle pooled connections per upstream host
    pub max_idle_conns: usize,
    /// Idle pooled connection lifetime, in seconds
    pub idle_conn_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstreams: HashMap::new(),
            load_balancer: LoadBalancerPolicy::RoundRobin,
            timeout_secs: 30,
            max_idle_conns: 100,
            idle_conn_timeout_secs: 90,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level filter (e.g. "info", "debug", "portico=trace")
    pub log_level: String,
    /// Emit JSON log lines instead of the console format
    pub log_json: bool,
    /// Enable distributed tracing export
    pub tracing_enabled: bool,
    /// Collector endpoint for the tracing exporter
    pub tracing_endpoint: String,
    /// Enable the Prometheus exposition endpoint
    pub metrics_enabled: bool,
    /// Path the metrics endpoint is served on
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: true,
            tracing_enabled: false,
            tracing_endpoint: String::new(),
            metrics_enabled: true,
            metrics_path: "/metrics".to_string(),
        }
    }
}

/// Root configuration for the gateway.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub observability: ObservabilityConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.redis.url, "redis://localhost:6379");
        assert_eq!(cfg.auth.auth_type, AuthType::Both);
        assert_eq!(cfg.rate_limit.algorithm, RateLimitAlgorithm::TokenBucket);
        assert_eq!(cfg.rate_limit.bucket_size, 100);
        assert_eq!(cfg.rate_limit.refill_rate, 10);
        assert_eq!(cfg.proxy.load_balancer, LoadBalancerPolicy::RoundRobin);
        assert_eq!(cfg.observability.metrics_path, "/metrics");
        assert_eq!(
            cfg.auth.skip_auth_paths,
            vec!["/health", "/ready", "/metrics"]
        );
    }

    #[test]
    fn test_enum_snake_case_round_trip() {
        let algo: RateLimitAlgorithm = serde_json::from_str("\"sliding_window\"").unwrap();
        assert_eq!(algo, RateLimitAlgorithm::SlidingWindow);
        assert_eq!(algo.as_str(), "sliding_window");

        let policy: LoadBalancerPolicy = serde_json::from_str("\"least_connections\"").unwrap();
        assert_eq!(policy, LoadBalancerPolicy::LeastConnections);

        let auth: AuthType = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(auth.as_str(), "mock");
    }

    #[test]
    fn test_upstream_config_defaults() {
        let upstream: UpstreamConfig = serde_json::from_str(
            r#"{"urls": ["http://a:3000", "http://b:3000"]}"#,
        )
        .unwrap();
        assert_eq!(upstream.weight, 1);
        assert!(upstream.health_check.is_none());

        let with_probe: UpstreamConfig = serde_json::from_str(
            r#"{"urls": ["http://a:3000"], "weight": 5, "health_check": {"path": "/health"}}"#,
        )
        .unwrap();
        assert_eq!(with_probe.weight, 5);
        let hc = with_probe.health_check.unwrap();
        assert_eq!(hc.interval_secs, 10);
        assert_eq!(hc.timeout_secs, 5);
    }
}
