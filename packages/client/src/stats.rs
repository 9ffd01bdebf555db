//! Engine statistics
//!
//! Atomic counters bumped at dispatch, completion, and reconnect sites.
//! Cheap enough to stay on unconditionally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub requests_enqueued: AtomicU64,
    pub requests_finished: AtomicU64,
    pub requests_failed: AtomicU64,
    pub requests_pipelined: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests_enqueued: u64,
    pub requests_finished: u64,
    pub requests_failed: u64,
    pub requests_pipelined: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnects: u64,
}

impl ConnectionStats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::Relaxed),
            requests_finished: self.requests_finished.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_pipelined: self.requests_pipelined.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = ConnectionStats::new();
        stats.add(&stats.requests_enqueued, 3);
        stats.add(&stats.bytes_sent, 128);
        let snap = stats.snapshot();
        assert_eq!(snap.requests_enqueued, 3);
        assert_eq!(snap.bytes_sent, 128);
        assert_eq!(snap.requests_failed, 0);
    }
}
