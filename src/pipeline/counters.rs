//! Process-wide pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Shared counters updated by the ingestor and the workers.
///
/// Held behind an `Arc` and injected into every component that updates it.
/// All counts reset on restart; the persisted unique count is reported from
/// the store instead.
#[derive(Debug)]
pub struct PipelineCounters {
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
    failed: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub failed: u64,
}

impl Default for PipelineCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            unique_processed: AtomicU64::new(0),
            duplicate_dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.unique_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            unique_processed: self.unique_processed.load(Ordering::Relaxed),
            duplicate_dropped: self.duplicate_dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Time since the counters were created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = PipelineCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let counters = PipelineCounters::new();
        counters.record_received(3);
        counters.record_processed();
        counters.record_processed();
        counters.record_duplicate();
        counters.record_failed();

        let snap = counters.snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.unique_processed, 2);
        assert_eq!(snap.duplicate_dropped, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn test_counters_no_lost_updates_across_threads() {
        let counters = Arc::new(PipelineCounters::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        counters.record_duplicate();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counters.snapshot().duplicate_dropped, 8_000);
    }
}
