//! Fixed-interval cycle scheduler for the warmpool keepalive loop.
//!
//! Wakes the keepalive task once per interval, with pass-duration
//! monitoring and overrun skipping.
//!
//! # Jitter
//!
//! The first cycle fires at `every + random(0..initial_jitter)`. Several
//! processes deployed together would otherwise scan (and validate
//! against the remote service) in lockstep for their whole lifetime.
//!
//! # Integration
//!
//! The scheduler is designed to sit inside a `tokio::select!` loop next to
//! a shutdown branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown_requested(&mut rx) => break,
//!         _ = scheduler.wait_for_cycle() => {
//!             pool.keepalive_pass().await;
//!             scheduler.record_cycle_end();
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the cycle scheduler.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Interval between cycles.
    pub every: Duration,
    /// Upper bound of the random delay added to the *first* cycle only.
    pub initial_jitter: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(60),
            initial_jitter: Duration::from_secs(1),
        }
    }
}

impl CycleConfig {
    /// Shortest interval the scheduler accepts.
    pub const MIN_EVERY: Duration = Duration::from_millis(10);

    /// Longest interval (and first-cycle jitter) the scheduler accepts.
    pub const MAX_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Config with the given interval and no jitter.
    pub fn every(every: Duration) -> Self {
        Self {
            every,
            initial_jitter: Duration::ZERO,
        }
    }

    /// Raises an interval below [`Self::MIN_EVERY`] to the minimum and
    /// caps interval and jitter at [`Self::MAX_EVERY`].
    ///
    /// Called automatically by [`CycleScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.every < Self::MIN_EVERY {
            warn!(
                every_ms = self.every.as_millis() as u64,
                min_ms = Self::MIN_EVERY.as_millis() as u64,
                "cycle interval below minimum, clamping"
            );
            self.every = Self::MIN_EVERY;
        }
        if self.every > Self::MAX_EVERY {
            warn!(
                every_secs = self.every.as_secs(),
                max_secs = Self::MAX_EVERY.as_secs(),
                "cycle interval above maximum, clamping"
            );
            self.every = Self::MAX_EVERY;
        }
        if self.initial_jitter > Self::MAX_EVERY {
            warn!(
                jitter_secs = self.initial_jitter.as_secs(),
                "cycle jitter above maximum, clamping"
            );
            self.initial_jitter = Self::MAX_EVERY;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Cycle info
// ---------------------------------------------------------------------------

/// Information about a fired cycle, returned by [`CycleScheduler::wait_for_cycle`].
#[derive(Debug, Clone)]
pub struct CycleInfo {
    /// Monotonically increasing cycle number (starts at 1).
    pub cycle: u64,
    /// `true` if this cycle fired late.
    pub overrun: bool,
    /// Whole cycles skipped because the previous pass ran long.
    pub cycles_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics, updated by [`CycleScheduler::record_cycle_end`].
#[derive(Debug, Clone, Default)]
pub struct CycleMetrics {
    /// Total cycles fired.
    pub total_cycles: u64,
    /// Total late wake-ups.
    pub total_overruns: u64,
    /// Total cycles skipped.
    pub total_skipped: u64,
    /// Exponential moving average of pass duration (α = 0.1).
    pub avg_pass_time: Duration,
    /// Longest pass observed.
    pub max_pass_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval cycle scheduler. One per keepalive task.
pub struct CycleScheduler {
    config: CycleConfig,
    cycle_count: u64,
    next_cycle: Instant,
    /// Set by `wait_for_cycle`, consumed by `record_cycle_end`.
    pass_start: Option<Instant>,
    metrics: CycleMetrics,
}

impl CycleScheduler {
    /// Create a new scheduler; the first cycle is scheduled with jitter.
    pub fn new(config: CycleConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..=max_us))
        };
        let next_cycle = Instant::now() + config.every + jitter;

        debug!(
            every_ms = config.every.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "cycle scheduler created"
        );

        Self {
            config,
            cycle_count: 0,
            next_cycle,
            pass_start: None,
            metrics: CycleMetrics::default(),
        }
    }

    /// Create a scheduler for an interval with no jitter.
    pub fn with_interval(every: Duration) -> Self {
        Self::new(CycleConfig::every(every))
    }

    /// Wait until the next cycle is due.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// schedule untouched.
    pub async fn wait_for_cycle(&mut self) -> CycleInfo {
        let next = self.next_cycle;
        let every = self.config.every;

        time::sleep_until(next).await;

        let now = Instant::now();
        self.cycle_count += 1;
        self.pass_start = Some(now);

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > every / 10;
        let mut cycles_skipped = 0u64;
        if overrun {
            cycles_skipped = (late_by.as_nanos() / every.as_nanos()) as u64;
            if cycles_skipped > 0 {
                warn!(
                    cycle = self.cycle_count,
                    skipped = cycles_skipped,
                    late_ms = late_by.as_millis() as u64,
                    "keepalive cycle overrun, skipping ahead"
                );
            }
            self.metrics.total_overruns += 1;
        }

        // Always schedule from now, never from the missed deadline.
        self.next_cycle = now + every;

        self.metrics.total_skipped += cycles_skipped;
        self.metrics.total_cycles += 1;

        trace!(cycle = self.cycle_count, overrun, "cycle fired");

        CycleInfo {
            cycle: self.cycle_count,
            overrun,
            cycles_skipped,
        }
    }

    /// Record that the pass for the current cycle has finished.
    ///
    /// Call this after the keepalive pass returns. A pass longer than the
    /// interval is logged: the next cycle will fire late and skip.
    pub fn record_cycle_end(&mut self) {
        let Some(start) = self.pass_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if elapsed >= self.config.every {
            warn!(
                cycle = self.cycle_count,
                elapsed_ms = elapsed.as_millis() as u64,
                every_ms = self.config.every.as_millis() as u64,
                "keepalive pass took longer than the cycle interval"
            );
        }

        if elapsed > self.metrics.max_pass_time {
            self.metrics.max_pass_time = elapsed;
        }
        let alpha = 0.1;
        let prev = self.metrics.avg_pass_time.as_secs_f64();
        let curr = elapsed.as_secs_f64();
        self.metrics.avg_pass_time =
            Duration::from_secs_f64(prev * (1.0 - alpha) + curr * alpha);
    }

    /// Current cycle count.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.config.every
    }

    /// When the next cycle is scheduled to fire.
    pub fn next_cycle(&self) -> Instant {
        self.next_cycle
    }
}
