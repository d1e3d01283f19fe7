use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{config::LoadBalancerPolicy, utils::ConnectionTracker};

/// A selection policy picks one candidate URL per request.
///
/// Policies are internally synchronized and shared across tasks; any
/// critical section is held only for the duration of a single pick, so the
/// request hot path never waits on more than one in-flight selection.
pub trait SelectionPolicy: Send + Sync + 'static {
    /// Pick one candidate from the routable set, or `None` when it is empty.
    fn pick(&self, candidates: &[String]) -> Option<String>;
}

/// Credit-based scheduler shared by the round-robin and weighted policies.
///
/// Every candidate carries a credit balance seeded with its base weight.
/// A pick takes the highest balance (first candidate wins ties), debits the
/// winner by the candidate total, then credits every candidate its base
/// weight again. The balance sum is invariant across picks, which makes the
/// schedule deterministic, starvation-free and convergent to the frequency
/// `w[i] / Σ w[j]` (the smooth weighted round-robin schedule).
///
/// With unit weights the same bookkeeping degenerates to a plain cycle in
/// candidate order starting at the first candidate, so round-robin is just
/// this scheduler without a weight table. Candidates absent from a pick
/// (health-filtered) keep their balance and resume where they left off when
/// they rejoin.
pub struct CreditScheduler {
    base_weights: HashMap<String, i64>,
    balances: Mutex<HashMap<String, i64>>,
}

impl CreditScheduler {
    /// A scheduler where every candidate weighs 1: plain round-robin.
    pub fn uniform() -> Self {
        Self {
            base_weights: HashMap::new(),
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// A scheduler with one weight per URL (weight floor is 1).
    pub fn weighted(urls: &[String], weights: &[u32]) -> Self {
        let mut base_weights = HashMap::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let weight = weights.get(index).copied().unwrap_or(1).max(1);
            base_weights.insert(url.clone(), i64::from(weight));
        }
        Self {
            base_weights,
            balances: Mutex::new(HashMap::new()),
        }
    }

    fn base_weight(&self, url: &str) -> i64 {
        self.base_weights.get(url).copied().unwrap_or(1)
    }

    /// Advance the schedule by one pick over the given candidates.
    pub fn next(&self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        let Ok(mut balances) = self.balances.lock() else {
            return candidates.first().cloned();
        };

        let mut pool = 0;
        for url in candidates {
            let weight = self.base_weight(url);
            balances.entry(url.clone()).or_insert(weight);
            pool += weight;
        }

        // max_by_key keeps the last maximum; rank earlier candidates higher
        // so the first one wins ties
        let winner = candidates
            .iter()
            .enumerate()
            .max_by_key(|(index, url)| {
                (balances.get(*url).copied().unwrap_or(0), -(*index as i64))
            })
            .map(|(_, url)| url.clone())?;

        if let Some(balance) = balances.get_mut(&winner) {
            *balance -= pool;
        }
        for url in candidates {
            if let Some(balance) = balances.get_mut(url) {
                *balance += self.base_weight(url);
            }
        }

        Some(winner)
    }
}

/// Fair rotation over the candidate set, first candidate first.
pub struct RoundRobinPolicy {
    schedule: CreditScheduler,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            schedule: CreditScheduler::uniform(),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn pick(&self, candidates: &[String]) -> Option<String> {
        self.schedule.next(candidates)
    }
}

/// Smooth weighted round-robin over the group's configured weights.
pub struct SmoothWeightedPolicy {
    schedule: CreditScheduler,
}

impl SmoothWeightedPolicy {
    pub fn new(urls: &[String], weights: &[u32]) -> Self {
        Self {
            schedule: CreditScheduler::weighted(urls, weights),
        }
    }
}

impl SelectionPolicy for SmoothWeightedPolicy {
    fn pick(&self, candidates: &[String]) -> Option<String> {
        self.schedule.next(candidates)
    }
}

/// Fewest in-flight upstream requests wins, backed by the process-local
/// [`ConnectionTracker`]. Ties go to the first candidate in natural order.
pub struct LeastConnectionsPolicy {
    tracker: Arc<ConnectionTracker>,
}

impl LeastConnectionsPolicy {
    pub fn new(tracker: Arc<ConnectionTracker>) -> Self {
        Self { tracker }
    }
}

impl SelectionPolicy for LeastConnectionsPolicy {
    fn pick(&self, candidates: &[String]) -> Option<String> {
        self.tracker.least_loaded(candidates)
    }
}

/// Build the per-group policy for a configured load-balancer choice.
pub fn policy_for(
    choice: LoadBalancerPolicy,
    urls: &[String],
    weights: &[u32],
    tracker: &Arc<ConnectionTracker>,
) -> Box<dyn SelectionPolicy> {
    match choice {
        LoadBalancerPolicy::RoundRobin => Box::new(RoundRobinPolicy::new()),
        LoadBalancerPolicy::LeastConnections => {
            Box::new(LeastConnectionsPolicy::new(Arc::clone(tracker)))
        }
        LoadBalancerPolicy::Weighted => Box::new(SmoothWeightedPolicy::new(urls, weights)),
    }
}
