use std::sync::atomic::{AtomicBool, Ordering};

use hyper::Uri;
use scc::HashMap;
use thiserror::Error;

use crate::{
    config::{HealthCheckConfig, UpstreamConfig},
    error::GatewayError,
};

/// Errors raised while building an upstream group from configuration
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("upstream group '{group}' has no candidate URLs")]
    EmptyGroup { group: String },

    #[error("candidate '{url}' in group '{group}' is not a valid URI: {reason}")]
    MalformedCandidate {
        group: String,
        url: String,
        reason: String,
    },

    #[error("candidate '{url}' in group '{group}' must use the http or https scheme")]
    UnsupportedScheme { group: String, url: String },

    #[error("candidate '{url}' in group '{group}' has no host")]
    MissingHost { group: String, url: String },
}

/// Result type for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Health bit for one candidate URL.
///
/// Single writer (the probe), many readers (the selector). Endpoints start
/// healthy so the group is fully routable before the first probe round.
#[derive(Debug)]
pub struct EndpointHealth {
    healthy: AtomicBool,
}

impl EndpointHealth {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// A named set of interchangeable endpoints behind a logical service name.
///
/// Candidate order is the configured order; the weighted policy assigns one
/// weight per URL equal to the group's configured weight (default 1).
/// Candidates are validated as absolute http/https URIs with a host at
/// construction, so the proxy can join paths onto them without re-checking.
#[derive(Debug)]
pub struct UpstreamGroup {
    name: String,
    urls: Vec<String>,
    weights: Vec<u32>,
    health: HashMap<String, EndpointHealth>,
    health_check: Option<HealthCheckConfig>,
}

impl UpstreamGroup {
    /// Build a group from configuration, validating every candidate URL.
    pub fn new(name: &str, config: &UpstreamConfig) -> UpstreamResult<Self> {
        if config.urls.is_empty() {
            return Err(UpstreamError::EmptyGroup {
                group: name.to_string(),
            });
        }

        for url in &config.urls {
            Self::validate_candidate(name, url)?;
        }

        let urls = config.urls.clone();
        let weights = vec![config.weight.max(1); urls.len()];

        let health = HashMap::new();
        for url in &urls {
            let _ = health.insert_sync(url.clone(), EndpointHealth::new());
        }

        Ok(Self {
            name: name.to_string(),
            urls,
            weights,
            health,
            health_check: config.health_check.clone(),
        })
    }

    /// A candidate must parse as an absolute URI, carry a dialable host and
    /// use a scheme the upstream client speaks.
    fn validate_candidate(group: &str, url: &str) -> UpstreamResult<()> {
        let parsed = url
            .parse::<Uri>()
            .map_err(|err| UpstreamError::MalformedCandidate {
                group: group.to_string(),
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        match parsed.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(UpstreamError::UnsupportedScheme {
                    group: group.to_string(),
                    url: url.to_string(),
                });
            }
        }

        if parsed.host().is_none() {
            return Err(UpstreamError::MissingHost {
                group: group.to_string(),
                url: url.to_string(),
            });
        }

        Ok(())
    }

    /// Logical service name (the first path segment it is routed under).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All configured candidate URLs, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    /// One weight per candidate URL.
    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    /// The group's probe configuration, if any.
    pub fn health_check(&self) -> Option<&HealthCheckConfig> {
        self.health_check.as_ref()
    }

    /// Record a probe verdict for one candidate. Called only by the probe.
    pub fn set_health(&self, url: &str, healthy: bool) {
        let _ = self.health.read_sync(url, |_, health| health.set_healthy(healthy));
    }

    /// Last observed health of one candidate (healthy when untracked).
    pub fn is_healthy(&self, url: &str) -> bool {
        self.health
            .read_sync(url, |_, health| health.is_healthy())
            .unwrap_or(true)
    }

    /// Candidate URLs the selector may use.
    ///
    /// With no probe configured every URL is routable. With a probe, only
    /// healthy URLs are offered; when that set is empty the full list is
    /// returned as last-ditch fallback rather than guaranteeing a 503.
    pub fn routable_urls(&self) -> Vec<String> {
        let all = self.urls();
        if self.health_check.is_none() {
            return all;
        }

        let healthy: Vec<String> = all
            .iter()
            .filter(|url| self.is_healthy(url))
            .cloned()
            .collect();

        if healthy.is_empty() { all } else { healthy }
    }
}

/// Split `/<service>/<rest...>` into the service name and the remaining path.
///
/// The remaining path always starts with `/` and is `/` when the request
/// names only the service.
pub fn parse_service_path(path: &str) -> Result<(String, String), GatewayError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);

    let mut parts = trimmed.splitn(2, '/');
    let service = parts.next().unwrap_or("");
    if service.is_empty() {
        return Err(GatewayError::BadRequest("Invalid path format".to_string()));
    }

    let remaining = match parts.next() {
        Some(rest) => format!("/{rest}"),
        None => "/".to_string(),
    };

    Ok((service.to_string(), remaining))
}
