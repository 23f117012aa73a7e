//! The keepalive loop: periodic self-healing scan of the pool.
//!
//! Each pass walks the sessions that were queued when it started, once
//! each, and for every session decides:
//!
//! ```text
//!   refresh candidate (position % modulo == 0) and jitter hit
//!       → close remotely, replace with a fresh session
//!   expired, or last create/validate failed
//!       → ValidateSession
//!           transport error  → keep as-is (never shrink the pool)
//!           ErrorRS          → discard, replace with a fresh session
//!           other fault      → mark bad, retry next pass
//!           success          → new expiry, refreshed token
//!   otherwise
//!       → back in the queue untouched
//! ```
//!
//! Sessions are taken without waiting: if callers have picked everything,
//! the pass simply ends early.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warmpool_cycle::{CycleConfig, CycleScheduler};
use warmpool_session::{Session, SessionService, ValidateSessionRS};

use crate::SessionPool;
use crate::pool::shutdown_requested;

/// Per-pass tallies returned by [`SessionPool::keepalive_pass`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Sessions taken from the queue this pass.
    pub scanned: usize,
    /// Sessions put back without any remote call.
    pub unchanged: usize,
    /// Successful validations.
    pub validated: usize,
    /// Sessions replaced after ErrorRS or a missing token.
    pub replaced: usize,
    /// Sessions rotated proactively.
    pub refreshed: usize,
    /// Validations that hit a transport error.
    pub network_errors: usize,
    /// Validations answered with a non-fatal fault.
    pub faults: usize,
}

impl<S: SessionService> SessionPool<S> {
    /// Spawns the keepalive loop on the current runtime.
    ///
    /// The task ends after [`signal_shutdown`](Self::signal_shutdown);
    /// await the handle before calling [`close`](Self::close).
    pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.run_keepalive().await })
    }

    /// Runs keepalive passes every `cycle_every` until shutdown.
    pub async fn run_keepalive(&self) {
        let mut shutdown = self.subscribe_shutdown();
        let mut scheduler = CycleScheduler::new(CycleConfig {
            every: self.config.cycle_every,
            initial_jitter: self.config.cycle_jitter,
        });

        info!(
            every_secs = self.config.cycle_every.as_secs_f64(),
            refresh_modulo = self.config.refresh_modulo(),
            "keepalive started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                info = scheduler.wait_for_cycle() => {
                    let report = self.keepalive_pass().await;
                    scheduler.record_cycle_end();
                    debug!(
                        cycle = info.cycle,
                        scanned = report.scanned,
                        validated = report.validated,
                        replaced = report.replaced,
                        refreshed = report.refreshed,
                        bad_sessions = self.bad_session_count(),
                        "keepalive pass done"
                    );
                }
            }
        }

        info!(cycles = scheduler.cycle_count(), "keepalive stopped");
    }

    /// Runs one scan over the sessions currently queued.
    ///
    /// Exposed so embedders (and tests) can drive passes themselves
    /// instead of spawning the loop.
    pub async fn keepalive_pass(&self) -> PassReport {
        // Fix the pass size up front: sessions re-enqueued during the
        // pass must not be scanned twice.
        let pass_len = self.queue.len();
        let modulo = self.config.refresh_modulo();
        let mut report = PassReport::default();

        for position in 1..=pass_len {
            if self.is_shutting_down() {
                debug!(position, "shutdown signalled, ending pass early");
                break;
            }
            let Some(session) = self.queue.try_pop() else {
                break;
            };
            report.scanned += 1;

            let session = self.heal(session, position, modulo, &mut report).await;
            if let Err(session) = self.queue.push(session).await {
                warn!(session_id = %session.id(), "pool closed mid-pass, closing session");
                self.close_remote(&session).await;
                break;
            }
        }

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        report
    }

    async fn heal(
        &self,
        session: Session,
        position: usize,
        modulo: usize,
        report: &mut PassReport,
    ) -> Session {
        if position % modulo == 0 && self.refresh_due() {
            report.refreshed += 1;
            return self.refresh(session).await;
        }
        if session.needs_validation(Instant::now()) {
            return self.validate(session, report).await;
        }
        report.unchanged += 1;
        session
    }

    /// Liveness jitter: only a fraction of refresh candidates rotate.
    fn refresh_due(&self) -> bool {
        let chance = self.config.refresh_chance;
        chance > 0.0 && rand::rng().random_bool(chance)
    }

    async fn refresh(&self, old: Session) -> Session {
        debug!(session_id = %old.id(), "rotating session proactively");
        self.close_remote(&old).await;
        self.stats.session_discarded(old.is_ok());
        let fresh = self.create_session().await;
        self.stats.refreshed.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    async fn validate(&self, mut session: Session, report: &mut PassReport) -> Session {
        // No token means creation failed: there is nothing to validate.
        let Some(token) = session.token().map(str::to_owned) else {
            return self.replace(session, report).await;
        };
        let was_ok = session.is_ok();

        match self.call(self.service().validate_session(&token)).await {
            Err(e) => {
                self.stats.network_errors.record(e.to_string());
                warn!(session_id = %session.id(), error = %e, "validation failed, keeping session");
                report.network_errors += 1;
                session
            }
            Ok(rs) if rs.status.is_error() => {
                if let Some(fault) = &rs.fault {
                    self.stats.fault_errors.record(fault.to_string());
                }
                self.replace(session, report).await
            }
            Ok(ValidateSessionRS {
                fault: Some(fault), ..
            }) => {
                self.stats.fault_errors.record(fault.to_string());
                warn!(session_id = %session.id(), %fault, "validation rejected");
                session.mark_faulted(fault);
                self.stats.health_changed(was_ok, false);
                report.faults += 1;
                session
            }
            Ok(rs) => {
                session.mark_validated(rs.token, self.config.expire.draw());
                self.stats.health_changed(was_ok, true);
                self.stats.validated.fetch_add(1, Ordering::Relaxed);
                report.validated += 1;
                debug!(session_id = %session.id(), "session validated");
                session
            }
        }
    }

    /// Swaps a dead session for a new one. The dead one is dropped
    /// without a close attempt: the remote side already invalidated it.
    async fn replace(&self, old: Session, report: &mut PassReport) -> Session {
        self.stats.session_discarded(old.is_ok());
        let fresh = self.create_session().await;
        self.stats.replaced.fetch_add(1, Ordering::Relaxed);
        report.replaced += 1;
        info!(
            old_session = %old.id(),
            new_session = %fresh.id(),
            ok = fresh.is_ok(),
            "session replaced"
        );
        fresh
    }
}
