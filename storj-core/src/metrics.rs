//! Node counters
//!
//! Cheap atomic counters bumped on the hot paths, with a serializable
//! snapshot for status endpoints and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct NodeMetrics {
    /// Inbound messages that failed signature, nonce, or node-id checks.
    pub auth_failures: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub offers_received: AtomicU64,
    pub contracts_stored: AtomicU64,
    pub audits_passed: AtomicU64,
    pub audits_failed: AtomicU64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            offers_received: self.offers_received.load(Ordering::Relaxed),
            contracts_stored: self.contracts_stored.load(Ordering::Relaxed),
            audits_passed: self.audits_passed.load(Ordering::Relaxed),
            audits_failed: self.audits_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the node counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub auth_failures: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub offers_received: u64,
    pub contracts_stored: u64,
    pub audits_passed: u64,
    pub audits_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let metrics = NodeMetrics::new();
        NodeMetrics::incr(&metrics.auth_failures);
        NodeMetrics::incr(&metrics.auth_failures);
        NodeMetrics::incr(&metrics.audits_passed);

        let snap = metrics.snapshot();
        assert_eq!(snap.auth_failures, 2);
        assert_eq!(snap.audits_passed, 1);
        assert_eq!(snap.audits_failed, 0);
    }
}
