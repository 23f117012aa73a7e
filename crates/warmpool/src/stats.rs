//! Pool-wide counters and diagnostics.
//!
//! Every counter is owned by the pool and mutated with atomic operations:
//! Populate, the keepalive task, promise watchers and Close all touch them
//! concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// How many recent error messages each diagnostics ring keeps.
const RECENT_CAPACITY: usize = 32;

/// A running total plus the most recent messages.
#[derive(Default)]
pub(crate) struct Diagnostics {
    total: AtomicU64,
    recent: Mutex<VecDeque<String>>,
}

impl Diagnostics {
    pub(crate) fn record(&self, message: String) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock();
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(message);
    }

    pub(crate) fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub(crate) fn recent(&self) -> Vec<String> {
        self.recent.lock().iter().cloned().collect()
    }
}

#[derive(Default)]
pub(crate) struct PoolStats {
    /// Sessions actually created by Populate (good or bad).
    pub(crate) pool_size_counter: AtomicUsize,
    /// Sessions currently held by callers or promises.
    pub(crate) leased: AtomicUsize,
    /// Sessions whose last create/validate failed.
    bad_sessions: AtomicUsize,
    pub(crate) cycles: AtomicU64,
    pub(crate) validated: AtomicU64,
    pub(crate) replaced: AtomicU64,
    pub(crate) refreshed: AtomicU64,
    pub(crate) network_errors: Diagnostics,
    pub(crate) fault_errors: Diagnostics,
}

impl PoolStats {
    /// A brand-new session entered the pool.
    pub(crate) fn session_created(&self, ok: bool) {
        if !ok {
            self.bad_sessions.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// A session left the pool for good (replaced or rotated out).
    pub(crate) fn session_discarded(&self, was_ok: bool) {
        if !was_ok {
            self.decrement_bad();
        }
    }

    /// A session in the pool flipped health.
    pub(crate) fn health_changed(&self, was_ok: bool, now_ok: bool) {
        match (was_ok, now_ok) {
            (true, false) => {
                self.bad_sessions.fetch_add(1, Ordering::AcqRel);
            }
            (false, true) => self.decrement_bad(),
            _ => {}
        }
    }

    fn decrement_bad(&self) {
        let _ = self.bad_sessions.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| Some(n.saturating_sub(1)),
        );
    }

    pub(crate) fn bad_sessions(&self) -> usize {
        self.bad_sessions.load(Ordering::Acquire)
    }

    pub(crate) fn lease_started(&self) {
        self.leased.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn lease_ended(&self) {
        let _ = self.leased.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| Some(n.saturating_sub(1)),
        );
    }
}

/// Point-in-time view of the pool, for dashboards and alerting.
///
/// Fields are read one by one without a global lock, so a snapshot taken
/// while the pool is busy may be off by the one or two sessions in
/// flight.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    /// Configured target size.
    pub config_pool_size: usize,
    /// Sessions actually created by Populate.
    pub pool_size_counter: usize,
    /// Sessions sitting in the queue.
    pub queued: usize,
    /// Sessions held by callers or promises.
    pub leased: usize,
    /// Sessions whose last create/validate failed.
    pub bad_sessions: usize,
    /// Keepalive passes completed.
    pub cycles: u64,
    /// Successful validations.
    pub validated: u64,
    /// Sessions replaced after being declared dead.
    pub replaced: u64,
    /// Sessions rotated proactively.
    pub refreshed: u64,
    /// Transport errors seen so far.
    pub network_errors: u64,
    /// Business faults seen so far.
    pub fault_errors: u64,
    /// Most recent transport error messages, oldest first.
    pub recent_network_errors: Vec<String>,
    /// Most recent business faults, oldest first.
    pub recent_fault_errors: Vec<String>,
    /// Whether the queue has been closed.
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_count_follows_health_transitions() {
        let stats = PoolStats::default();
        stats.session_created(false);
        stats.session_created(false);
        stats.session_created(true);
        assert_eq!(stats.bad_sessions(), 2);

        stats.health_changed(false, true);
        assert_eq!(stats.bad_sessions(), 1);
        stats.health_changed(true, false);
        assert_eq!(stats.bad_sessions(), 2);
        stats.health_changed(true, true);
        assert_eq!(stats.bad_sessions(), 2);

        stats.session_discarded(false);
        stats.session_discarded(true);
        assert_eq!(stats.bad_sessions(), 1);
    }

    #[test]
    fn test_bad_count_never_underflows() {
        let stats = PoolStats::default();
        stats.session_discarded(false);
        stats.health_changed(false, true);
        assert_eq!(stats.bad_sessions(), 0);
    }

    #[test]
    fn test_diagnostics_keeps_only_recent_messages() {
        let diag = Diagnostics::default();
        for i in 0..(RECENT_CAPACITY + 5) {
            diag.record(format!("err {i}"));
        }
        assert_eq!(diag.total(), (RECENT_CAPACITY + 5) as u64);
        let recent = diag.recent();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent[0], "err 5");
    }
}
