//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use warmpool_cycle::CycleConfig;
use warmpool_session::ExpireScheme;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SessionPool`](crate::SessionPool).
///
/// Fixed once the pool is built. Use [`PoolBuilder`](crate::PoolBuilder)
/// to override only the fields you care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of sessions the pool keeps warm. Zero is rejected by
    /// `populate`.
    pub pool_size: usize,

    /// Bounds for the randomized session expiry.
    pub expire: ExpireScheme,

    /// Interval between keepalive passes.
    pub cycle_every: Duration,

    /// Random delay (upper bound) added to the first keepalive pass.
    pub cycle_jitter: Duration,

    /// Timeout applied to every create/validate/close call.
    pub call_timeout: Duration,

    /// Probability that a refresh candidate is actually rotated.
    pub refresh_chance: f64,

    /// Explicit refresh modulo. `None` derives it from the pool size.
    pub refresh_modulo: Option<usize>,

    /// Idle timeout after which a promised session goes back to the pool.
    pub promise_timeout: Duration,

    /// How long `close` waits for leased sessions to come back.
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            expire: ExpireScheme::default(),
            cycle_every: Duration::from_secs(60),
            cycle_jitter: Duration::from_secs(1),
            call_timeout: Duration::from_secs(20),
            refresh_chance: 0.1,
            refresh_modulo: None,
            promise_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Longest promise idle timeout or close drain timeout accepted.
    pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

    /// Effective refresh modulo: every Nth scanned position is a refresh
    /// candidate.
    ///
    /// Derived as `pool_size / 5` so roughly five candidates come up per
    /// pass, never less than 1.
    pub fn refresh_modulo(&self) -> usize {
        self.refresh_modulo
            .unwrap_or(self.pool_size / 5)
            .max(1)
    }

    /// Fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when the pool is built. Rules:
    /// - inverted expiry bounds are swapped, and both are capped at
    ///   [`ExpireScheme::MAX_MINUTES`];
    /// - `refresh_chance` clamped to `0.0..=1.0` (NaN becomes 0.0);
    /// - zero `cycle_every` / `call_timeout` fall back to the defaults;
    /// - `cycle_every` / `cycle_jitter` are capped at
    ///   [`CycleConfig::MAX_EVERY`];
    /// - `promise_timeout` / `drain_timeout` are capped at
    ///   [`Self::MAX_WAIT`].
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.expire.min_minutes > self.expire.max_minutes {
            warn!(
                min = self.expire.min_minutes,
                max = self.expire.max_minutes,
                "expire scheme bounds inverted, swapping"
            );
            self.expire = ExpireScheme::new(
                self.expire.max_minutes,
                self.expire.min_minutes,
            );
        }
        let max = ExpireScheme::MAX_MINUTES;
        if self.expire.max_minutes > max {
            warn!(
                min = self.expire.min_minutes,
                max = self.expire.max_minutes,
                cap = max,
                "expire scheme bounds too large, capping"
            );
            self.expire = ExpireScheme::new(self.expire.min_minutes.min(max), max);
        }
        if self.refresh_chance.is_nan() {
            self.refresh_chance = 0.0;
        }
        self.refresh_chance = self.refresh_chance.clamp(0.0, 1.0);
        if self.cycle_every.is_zero() {
            warn!("cycle_every is zero, using default");
            self.cycle_every = defaults.cycle_every;
        }
        if self.call_timeout.is_zero() {
            warn!("call_timeout is zero, using default");
            self.call_timeout = defaults.call_timeout;
        }
        self.cycle_every = cap("cycle_every", self.cycle_every, CycleConfig::MAX_EVERY);
        self.cycle_jitter = cap("cycle_jitter", self.cycle_jitter, CycleConfig::MAX_EVERY);
        self.promise_timeout = cap("promise_timeout", self.promise_timeout, Self::MAX_WAIT);
        self.drain_timeout = cap("drain_timeout", self.drain_timeout, Self::MAX_WAIT);
        self
    }
}

fn cap(field: &'static str, value: Duration, max: Duration) -> Duration {
    if value > max {
        warn!(
            field,
            secs = value.as_secs(),
            max_secs = max.as_secs(),
            "duration too large, capping"
        );
        return max;
    }
    value
}
