use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Initialize structured logging from observability configuration.
///
/// `RUST_LOG` overrides the configured level when set. JSON output is used in
/// production; the pretty console format is available for development via
/// `log_json = false`.
///
/// Distributed trace export is an external concern: when `tracing_enabled` is
/// set the subscriber still installs as usual and the exporter endpoint is
/// only surfaced here so operators can see what the process was told.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .wrap_err_with(|| format!("Invalid log level: {}", config.log_level))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.log_json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .init();
    }

    if config.tracing_enabled {
        tracing::info!(
            endpoint = %config.tracing_endpoint,
            "Distributed tracing requested; attach an exporter to this endpoint"
        );
    }

    Ok(())
}

/// Shutdown tracing gracefully, flushing pending output.
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}

/// Create a request-scoped tracing span wrapping the whole admission pipeline.
pub fn create_request_span(
    method: &str,
    path: &str,
    request_id: &str,
    client_ip: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        client.ip = client_ip.unwrap_or("unknown"),
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create an upstream dispatch span.
pub fn create_upstream_span(upstream: &str, target_url: &str, method: &str) -> tracing::Span {
    tracing::info_span!(
        "upstream_request",
        upstream.name = upstream,
        upstream.url = target_url,
        http.method = method,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
