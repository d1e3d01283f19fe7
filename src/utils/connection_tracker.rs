//! In-process tracking of in-flight upstream requests.
//!
//! Counters are keyed by candidate URL and drive the `least_connections`
//! selection policy. Increments are paired with decrements via an RAII guard
//! so every exit path (success, dispatch error, caller disconnect) restores
//! the count. Counts never dip below zero.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use scc::HashMap;

/// Per-URL counters of active upstream requests routed through this process.
///
/// The view is process-local only: concurrent gateway instances each track
/// their own in-flight requests.
pub struct ConnectionTracker {
    counts: HashMap<String, AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Increment the in-flight count for a URL.
    pub fn increment(&self, url: &str) {
        let incremented = self
            .counts
            .read_sync(url, |_, count| {
                count.fetch_add(1, Ordering::AcqRel);
            })
            .is_some();

        if !incremented && self.counts.insert_sync(url.to_string(), AtomicU64::new(1)).is_err() {
            // Lost the insert race; the entry exists now.
            let _ = self.counts.read_sync(url, |_, count| {
                count.fetch_add(1, Ordering::AcqRel);
            });
        }
    }

    /// Decrement the in-flight count for a URL, saturating at zero.
    pub fn decrement(&self, url: &str) {
        let _ = self.counts.read_sync(url, |_, count| {
            let mut current = count.load(Ordering::Acquire);
            while current > 0 {
                match count.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        });
    }

    /// Current in-flight count for a URL (zero when untracked).
    pub fn count(&self, url: &str) -> u64 {
        self.counts
            .read_sync(url, |_, count| count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Pick the candidate with the fewest in-flight requests.
    /// Ties are broken by the first candidate in the given order.
    pub fn least_loaded(&self, urls: &[String]) -> Option<String> {
        let mut best: Option<(&String, u64)> = None;
        for url in urls {
            let count = self.count(url);
            match best {
                Some((_, best_count)) if count >= best_count => {}
                _ => best = Some((url, count)),
            }
        }
        best.map(|(url, _)| url.clone())
    }

    /// Increment the count for `url` and return a guard that decrements it on
    /// drop, including on error paths and caller disconnects.
    pub fn track(self: &Arc<Self>, url: &str) -> ConnectionGuard {
        self.increment(url);
        ConnectionGuard {
            tracker: Arc::clone(self),
            url: url.to_string(),
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard pairing an increment with its decrement.
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    url: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement(&self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_decrement() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.count("http://a"), 0);

        tracker.increment("http://a");
        tracker.increment("http://a");
        assert_eq!(tracker.count("http://a"), 2);

        tracker.decrement("http://a");
        assert_eq!(tracker.count("http://a"), 1);
    }

    #[test]
    fn test_never_below_zero() {
        let tracker = ConnectionTracker::new();
        tracker.decrement("http://a");
        assert_eq!(tracker.count("http://a"), 0);

        tracker.increment("http://a");
        tracker.decrement("http://a");
        tracker.decrement("http://a");
        assert_eq!(tracker.count("http://a"), 0);
    }

    #[test]
    fn test_least_loaded_ties_prefer_first() {
        let tracker = ConnectionTracker::new();
        let urls = vec![
            "http://a".to_string(),
            "http://b".to_string(),
            "http://c".to_string(),
        ];

        // All zero: first wins
        assert_eq!(tracker.least_loaded(&urls), Some("http://a".to_string()));

        tracker.increment("http://a");
        assert_eq!(tracker.least_loaded(&urls), Some("http://b".to_string()));

        tracker.increment("http://b");
        tracker.increment("http://b");
        tracker.increment("http://c");
        // a=1, b=2, c=1: a wins the tie
        assert_eq!(tracker.least_loaded(&urls), Some("http://a".to_string()));
    }

    #[test]
    fn test_least_loaded_empty() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.least_loaded(&[]), None);
    }

    #[test]
    fn test_guard_decrements_on_drop() {
        let tracker = Arc::new(ConnectionTracker::new());
        {
            let _guard = tracker.track("http://a");
            assert_eq!(tracker.count("http://a"), 1);
            {
                let _inner = tracker.track("http://a");
                assert_eq!(tracker.count("http://a"), 2);
            }
            assert_eq!(tracker.count("http://a"), 1);
        }
        assert_eq!(tracker.count("http://a"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_pairing_returns_to_zero() {
        let tracker = Arc::new(ConnectionTracker::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let _guard = tracker.track("http://a");
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.count("http://a"), 0);
    }
}
