use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::ProxyConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Shares one pooled connection set across all upstream dispatches,
///   bounded by max-idle-per-host and idle timeout from proxy configuration
/// * Bounds every request by the configured deadline
/// * Streams request and response bodies without buffering
/// * Performs GET based liveness probes with their own timeout
///
/// This adapter is intentionally minimal; retries / circuit breaking can be
/// layered on a different abstraction if required.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter from proxy configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_conns)
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            timeout_secs = config.timeout_secs,
            max_idle_conns = config.max_idle_conns,
            "Created pooled upstream HTTP client"
        );

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let client = self.client.clone();

        // Set Host header from the target URI; everything else is forwarded
        // exactly as received
        if let Some(host_str) = req.uri().host() {
            let host_value = if let Some(port) = req.uri().port() {
                HeaderValue::from_str(&format!("{host_str}:{}", port.as_u16()))
            } else {
                HeaderValue::from_str(host_str)
            };
            match host_value {
                Ok(value) => {
                    req.headers_mut().insert(header::HOST, value);
                }
                Err(_) => {
                    return Err(HttpClientError::InvalidRequest(format!(
                        "Invalid host in URI: {host_str}"
                    )));
                }
            }
        } else {
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let (mut parts, body) = req.into_parts();
        // HTTP/1.1 on the wire; ALPN may still negotiate h2
        parts.version = Version::HTTP_11;

        let method_for_error = parts.method.clone();
        let uri_for_error = parts.uri.clone();
        let outgoing_request = Request::from_parts(parts, body);

        match timeout(self.request_timeout, client.request(outgoing_request)).await {
            Ok(Ok(response)) => {
                let (mut parts, hyper_body) = response.into_parts();

                // The body arrives decoded; the server side re-frames it
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Error making request to upstream ({} {}): {}",
                    method_for_error,
                    uri_for_error,
                    e
                );
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method_for_error} {uri_for_error} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(
                    "Upstream request timed out: {} {}",
                    method_for_error,
                    uri_for_error
                );
                Err(HttpClientError::Timeout(self.request_timeout.as_secs()))
            }
        }
    }

    async fn health_check(&self, url: &str, timeout_secs: u64) -> HttpClientResult<bool> {
        let client = self.client.clone();

        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let timeout_duration = Duration::from_secs(timeout_secs);

        match timeout(timeout_duration, client.request(request)).await {
            Ok(result) => match result {
                Ok(response) => {
                    // Healthy iff the probe answers 200 within the deadline
                    let is_healthy = response.status() == StatusCode::OK;
                    // Consume the body to return the connection to the pool
                    let _ = response.into_body().collect().await;
                    tracing::debug!("Health check for {} result: {}", url, is_healthy);
                    Ok(is_healthy)
                }
                Err(err) => {
                    tracing::debug!("Health check error for {}: {}", url, err);
                    Ok(false)
                }
            },
            Err(_) => {
                tracing::debug!("Health check timeout for {}", url);
                Err(HttpClientError::Timeout(timeout_secs))
            }
        }
    }
}
