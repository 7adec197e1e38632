//! Replay counters and gauges
//!
//! Fire-and-forget atomics shared by every worker. Nothing reads them back for control
//! flow; [`ReplayStats::snapshot`] exists for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ReplayStats {
    events_admitted: AtomicU64,
    events_applied: AtomicU64,
    events_skipped: AtomicU64,
    events_logged: AtomicU64,
    events_dropped: AtomicU64,
    replay_failures: AtomicU64,
    lock_wait_retries: AtomicU64,
    reconnects: AtomicU64,
    outcomes_written: AtomicU64,
    write_failures: AtomicU64,
    event_queue_depth: AtomicU64,
    outcome_queue_depth: AtomicU64,
}

/// Point-in-time copy of [`ReplayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_admitted: u64,
    pub events_applied: u64,
    pub events_skipped: u64,
    pub events_logged: u64,
    pub events_dropped: u64,
    pub replay_failures: u64,
    pub lock_wait_retries: u64,
    pub reconnects: u64,
    pub outcomes_written: u64,
    pub write_failures: u64,
    pub event_queue_depth: u64,
    pub outcome_queue_depth: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_admitted(&self) {
        bump(&self.events_admitted);
    }

    pub fn event_applied(&self) {
        bump(&self.events_applied);
    }

    pub fn event_skipped(&self) {
        bump(&self.events_skipped);
    }

    pub fn event_logged(&self) {
        bump(&self.events_logged);
    }

    pub fn event_dropped(&self) {
        bump(&self.events_dropped);
    }

    pub fn replay_failed(&self) {
        bump(&self.replay_failures);
    }

    pub fn lock_wait_retried(&self) {
        bump(&self.lock_wait_retries);
    }

    pub fn reconnected(&self) {
        bump(&self.reconnects);
    }

    pub fn outcome_written(&self) {
        bump(&self.outcomes_written);
    }

    pub fn write_failed(&self) {
        bump(&self.write_failures);
    }

    pub fn set_event_queue_depth(&self, depth: usize) {
        self.event_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn set_outcome_queue_depth(&self, depth: usize) {
        self.outcome_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            events_admitted: load(&self.events_admitted),
            events_applied: load(&self.events_applied),
            events_skipped: load(&self.events_skipped),
            events_logged: load(&self.events_logged),
            events_dropped: load(&self.events_dropped),
            replay_failures: load(&self.replay_failures),
            lock_wait_retries: load(&self.lock_wait_retries),
            reconnects: load(&self.reconnects),
            outcomes_written: load(&self.outcomes_written),
            write_failures: load(&self.write_failures),
            event_queue_depth: load(&self.event_queue_depth),
            outcome_queue_depth: load(&self.outcome_queue_depth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ReplayStats::new();
        stats.event_admitted();
        stats.event_admitted();
        stats.reconnected();
        stats.set_event_queue_depth(12);
        let snap = stats.snapshot();
        assert_eq!(snap.events_admitted, 2);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.event_queue_depth, 12);
        assert_eq!(snap.outcomes_written, 0);
    }
}
