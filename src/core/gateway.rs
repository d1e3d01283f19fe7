//! Core upstream selection service.
//!
//! The `GatewayService` aggregates immutable upstream configuration with
//! runtime state (per-URL health, per-group selection cursors). It provides:
//! * Group lookup by service name
//! * Health-aware candidate filtering
//! * Policy-driven upstream selection (round-robin, least-connections,
//!   smooth weighted round-robin)
//!
//! This layer deliberately avoids I/O and only manipulates in-memory data so
//! it remains fast and easily testable in isolation.
use std::{collections::HashMap, sync::Arc};

use eyre::Result;

use crate::{
    config::{LoadBalancerPolicy, ProxyConfig},
    core::{
        balancer::{SelectionPolicy, policy_for},
        upstream::UpstreamGroup,
    },
    utils::ConnectionTracker,
};

/// Central selector for routing requests to upstream groups. An instance is
/// built once from configuration; per-group policies keep their own
/// schedules, so lookups in the hot path stay allocation-free.
pub struct GatewayService {
    groups: HashMap<String, Arc<UpstreamGroup>>,
    policies: HashMap<String, Box<dyn SelectionPolicy>>,
    policy: LoadBalancerPolicy,
}

impl GatewayService {
    /// Create a new gateway service from proxy configuration.
    ///
    /// This eagerly instantiates every upstream group and its selection
    /// policy so request handling avoids allocation and re-validation.
    pub fn new(config: &ProxyConfig, tracker: Arc<ConnectionTracker>) -> Result<Self> {
        let mut groups = HashMap::new();
        let mut policies = HashMap::new();

        for (name, upstream_config) in &config.upstreams {
            let group = Arc::new(UpstreamGroup::new(name, upstream_config)?);
            let selection = policy_for(
                config.load_balancer,
                &group.urls(),
                group.weights(),
                &tracker,
            );

            groups.insert(name.clone(), group);
            policies.insert(name.clone(), selection);
        }

        Ok(Self {
            groups,
            policies,
            policy: config.load_balancer,
        })
    }

    /// Look up an upstream group by service name.
    pub fn group(&self, name: &str) -> Option<Arc<UpstreamGroup>> {
        self.groups.get(name).cloned()
    }

    /// Iterate all configured groups (used to start health probes).
    pub fn groups(&self) -> impl Iterator<Item = &Arc<UpstreamGroup>> {
        self.groups.values()
    }

    /// Number of configured upstream groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The configured selection policy.
    pub fn policy(&self) -> LoadBalancerPolicy {
        self.policy
    }

    /// Select one candidate URL for a group, respecting health and policy.
    ///
    /// Returns `None` when the group has no routable candidate, in which case
    /// the pipeline answers 503.
    pub fn select_upstream(&self, group: &UpstreamGroup) -> Option<String> {
        let candidates = group.routable_urls();
        if candidates.is_empty() {
            return None;
        }

        self.policies
            .get(group.name())
            .and_then(|selection| selection.pick(&candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckConfig, UpstreamConfig};

    fn proxy_config(policy: LoadBalancerPolicy) -> ProxyConfig {
        let mut config = ProxyConfig {
            load_balancer: policy,
            ..ProxyConfig::default()
        };
        config.upstreams.insert(
            "svc".to_string(),
            UpstreamConfig {
                urls: vec![
                    "http://a:3000".to_string(),
                    "http://b:3000".to_string(),
                ],
                weight: 1,
                health_check: Some(HealthCheckConfig {
                    path: "/health".to_string(),
                    interval_secs: 1,
                    timeout_secs: 1,
                }),
            },
        );
        config
    }

    #[test]
    fn test_unknown_group() {
        let tracker = Arc::new(ConnectionTracker::new());
        let service =
            GatewayService::new(&proxy_config(LoadBalancerPolicy::RoundRobin), tracker).unwrap();
        assert!(service.group("nope").is_none());
        assert_eq!(service.group_count(), 1);
    }

    #[test]
    fn test_round_robin_selection_cycles() {
        let tracker = Arc::new(ConnectionTracker::new());
        let service =
            GatewayService::new(&proxy_config(LoadBalancerPolicy::RoundRobin), tracker).unwrap();
        let group = service.group("svc").unwrap();

        let first = service.select_upstream(&group).unwrap();
        let second = service.select_upstream(&group).unwrap();
        let third = service.select_upstream(&group).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_selection_excludes_unhealthy() {
        let tracker = Arc::new(ConnectionTracker::new());
        let service =
            GatewayService::new(&proxy_config(LoadBalancerPolicy::RoundRobin), tracker).unwrap();
        let group = service.group("svc").unwrap();

        group.set_health("http://a:3000", false);
        for _ in 0..4 {
            assert_eq!(
                service.select_upstream(&group),
                Some("http://b:3000".to_string())
            );
        }
    }

    #[test]
    fn test_least_connections_selection() {
        let tracker = Arc::new(ConnectionTracker::new());
        let service = GatewayService::new(
            &proxy_config(LoadBalancerPolicy::LeastConnections),
            tracker.clone(),
        )
        .unwrap();
        let group = service.group("svc").unwrap();

        tracker.increment("http://a:3000");
        assert_eq!(
            service.select_upstream(&group),
            Some("http://b:3000".to_string())
        );
    }

    #[test]
    fn test_invalid_upstream_url_rejected() {
        let mut config = ProxyConfig::default();
        config.upstreams.insert(
            "svc".to_string(),
            UpstreamConfig {
                urls: vec!["not-a-url".to_string()],
                weight: 1,
                health_check: None,
            },
        );
        let tracker = Arc::new(ConnectionTracker::new());
        assert!(GatewayService::new(&config, tracker).is_err());
    }
}
