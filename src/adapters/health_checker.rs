use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    config::HealthCheckConfig, core::upstream::UpstreamGroup, ports::http_client::HttpClient,
};

/// Periodic liveness probe for one upstream group.
///
/// Each round issues `GET <candidate>/<path>` against every candidate under
/// the probe deadline and flips the group's per-URL health bits. The probe is
/// the single writer of health state; the selector only reads it. Probing
/// runs on its own task and never blocks selection.
pub struct HealthChecker {
    group: Arc<UpstreamGroup>,
    http_client: Arc<dyn HttpClient>,
}

impl HealthChecker {
    pub fn new(group: Arc<UpstreamGroup>, http_client: Arc<dyn HttpClient>) -> Self {
        Self { group, http_client }
    }

    /// Run the probe loop until the owning task is aborted.
    ///
    /// An initial round runs immediately so a dead endpoint is excluded
    /// before the first interval elapses.
    pub async fn run(&self) {
        let Some(config) = self.group.health_check().cloned() else {
            tracing::info!(group = self.group.name(), "Health checking not configured");
            return;
        };

        let interval = Duration::from_secs(config.interval_secs.max(1));

        tracing::info!(
            group = self.group.name(),
            interval_secs = config.interval_secs,
            timeout_secs = config.timeout_secs,
            path = %config.path,
            "Starting health probe"
        );

        self.probe_round(&config).await;

        loop {
            sleep(interval).await;
            self.probe_round(&config).await;
        }
    }

    /// Probe every candidate once and update the group's health map.
    pub async fn probe_round(&self, config: &HealthCheckConfig) {
        for url in self.group.urls() {
            let probe_url = format!("{}{}", url.trim_end_matches('/'), config.path);

            let healthy = match self
                .http_client
                .health_check(&probe_url, config.timeout_secs)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(
                        group = self.group.name(),
                        url = %url,
                        error = %err,
                        "Health probe request failed"
                    );
                    false
                }
            };

            let was_healthy = self.group.is_healthy(&url);
            if healthy != was_healthy {
                if healthy {
                    tracing::info!(group = self.group.name(), url = %url, "Upstream is now HEALTHY");
                } else {
                    tracing::warn!(group = self.group.name(), url = %url, "Upstream is now UNHEALTHY");
                }
            }

            self.group.set_health(&url, healthy);
        }

        tracing::debug!(group = self.group.name(), "Health probe round completed");
    }
}
