//! `SessionPool`: builder, Populate, Pick/Put and Close.
//!
//! The pool owns three things: the Session Service it creates sessions
//! through, a bounded queue of idle sessions, and the pool-wide counters.
//! Everything else (the keepalive loop, promises, the daemon) is layered
//! on top through `Arc<SessionPool<S>>`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};
use warmpool_session::{
    CreateSessionRS, ExpireScheme, Fault, ServiceError, Session, SessionService,
};

use crate::queue::SessionQueue;
use crate::stats::{PoolSnapshot, PoolStats};
use crate::{PoolConfig, PoolError};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring a [`SessionPool`]; the only way to make one
/// besides [`SessionPool::new`].
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolBuilder::new()
///     .pool_size(20)
///     .expire_scheme(10, 14)
///     .cycle_every(Duration::from_secs(60))
///     .build(my_service);
/// let report = warmpool::daemonize(pool, &TerminationSignal::DEFAULT).await?;
/// ```
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how many sessions the pool keeps warm.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Sets the randomized expiry bounds, in minutes.
    pub fn expire_scheme(mut self, min_minutes: u64, max_minutes: u64) -> Self {
        self.config.expire = ExpireScheme::new(min_minutes, max_minutes);
        self
    }

    /// Sets the keepalive interval.
    pub fn cycle_every(mut self, every: Duration) -> Self {
        self.config.cycle_every = every;
        self
    }

    /// Sets the random delay bound of the first keepalive pass.
    pub fn cycle_jitter(mut self, jitter: Duration) -> Self {
        self.config.cycle_jitter = jitter;
        self
    }

    /// Sets the timeout applied to every Session Service call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Sets the probability that a refresh candidate is rotated.
    /// `0.0` disables proactive rotation.
    pub fn refresh_chance(mut self, chance: f64) -> Self {
        self.config.refresh_chance = chance;
        self
    }

    /// Overrides the derived refresh modulo.
    pub fn refresh_modulo(mut self, modulo: usize) -> Self {
        self.config.refresh_modulo = Some(modulo);
        self
    }

    /// Sets the default idle timeout of promises.
    pub fn promise_timeout(mut self, timeout: Duration) -> Self {
        self.config.promise_timeout = timeout;
        self
    }

    /// Sets how long `close` waits for leased sessions to come back.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Builds the pool. Nothing is created remotely until
    /// [`SessionPool::populate`].
    pub fn build<S: SessionService>(self, service: S) -> Arc<SessionPool<S>> {
        Arc::new(SessionPool::new(service, self.config))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CloseReport
// ---------------------------------------------------------------------------

/// What [`SessionPool::close`] did with the pool's sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// Sessions closed on the remote side.
    pub closed: usize,
    /// Sessions whose CloseSession call failed (transport or fault).
    pub failed: usize,
    /// Sessions without a token, nothing to close remotely.
    pub skipped: usize,
    /// Sessions still leased when the drain deadline passed.
    pub missing: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Closed,
    Failed,
    Skipped,
}

// ---------------------------------------------------------------------------
// SessionPool
// ---------------------------------------------------------------------------

/// A warm pool of pre-authenticated sessions.
///
/// ## Lifecycle
///
/// ```text
/// build() ──→ populate() ──→ pick()/put() + keepalive ──→ close()
///                 │                                          │
///                 ▼                                          ▼
///        N sessions created                     queue drained, every
///        (good or bad), queued                  session closed remotely
/// ```
///
/// The pool is created once per process and never recreated. Share it as
/// `Arc<SessionPool<S>>`.
pub struct SessionPool<S: SessionService> {
    service: S,
    pub(crate) config: PoolConfig,
    pub(crate) queue: SessionQueue,
    pub(crate) stats: PoolStats,
    shutdown: watch::Sender<bool>,
    populated: AtomicBool,
    closed: AtomicBool,
}

impl<S: SessionService> SessionPool<S> {
    /// Creates an unpopulated pool.
    pub fn new(service: S, config: PoolConfig) -> Self {
        let config = config.validated();
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            queue: SessionQueue::new(config.pool_size),
            config,
            stats: PoolStats::default(),
            shutdown,
            populated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The Session Service this pool talks to.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// The validated configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Sessions currently sitting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sessions whose last create/validate failed.
    pub fn bad_session_count(&self) -> usize {
        self.stats.bad_sessions()
    }

    /// Sessions actually created by Populate.
    pub fn pool_size_counter(&self) -> usize {
        self.stats.pool_size_counter.load(Ordering::Acquire)
    }

    // -- Session creation -------------------------------------------------

    /// Creates one session through the Session Service.
    ///
    /// Never fails: a transport error or a business fault yields a bad
    /// session (`is_ok() == false`) so the pool can always be filled to
    /// its configured size. Either way the outcome is counted.
    pub async fn create_session(&self) -> Session {
        let session = match self.call(self.service.create_session()).await {
            Ok(CreateSessionRS {
                token: Some(token),
                fault: None,
            }) if !token.is_empty() => {
                Session::healthy(token, self.config.expire.draw())
            }
            Ok(rs) => {
                let fault = rs.fault.unwrap_or_else(|| {
                    Fault::new("NO_TOKEN", "service returned no security token")
                });
                self.stats.fault_errors.record(fault.to_string());
                warn!(%fault, "session creation rejected by service");
                Session::bad(Some(fault))
            }
            Err(e) => {
                self.stats.network_errors.record(e.to_string());
                warn!(error = %e, "session creation failed");
                Session::bad(None)
            }
        };

        self.stats.session_created(session.is_ok());
        debug!(session_id = %session.id(), ok = session.is_ok(), "session created");
        session
    }

    /// Runs a Session Service call under the pool's call timeout.
    pub(crate) async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        let limit = self.config.call_timeout;
        time::timeout(limit, fut)
            .await
            .unwrap_or(Err(ServiceError::Timeout(limit)))
    }

    // -- Populate ---------------------------------------------------------

    /// Fills the pool with `pool_size` sessions.
    ///
    /// Every creation result is enqueued, healthy or not, so after this
    /// returns `pool_size_counter() == pool_size`. Individual failures are
    /// logged and counted, never returned.
    ///
    /// # Errors
    /// - [`PoolError::ZeroCapacity`] if `pool_size == 0`; the queue is
    ///   closed so later `pick` calls fail fast instead of hanging.
    /// - [`PoolError::AlreadyPopulated`] on a second call.
    /// - [`PoolError::Closed`] if the pool was closed while populating.
    pub async fn populate(&self) -> Result<(), PoolError> {
        if self.populated.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyPopulated);
        }

        let size = self.config.pool_size;
        if size == 0 {
            self.queue.close();
            error!("pool size is zero, queue closed");
            return Err(PoolError::ZeroCapacity);
        }

        info!(pool_size = size, "populating session pool");
        let started = Instant::now();

        for _ in 0..size {
            let session = self.create_session().await;
            if let Err(session) = self.queue.push(session).await {
                warn!("pool closed while populating, abandoning");
                self.close_remote(&session).await;
                return Err(PoolError::Closed);
            }
            self.stats.pool_size_counter.fetch_add(1, Ordering::AcqRel);
        }

        info!(
            pool_size_counter = self.pool_size_counter(),
            bad_sessions = self.bad_session_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session pool populated"
        );
        Ok(())
    }

    // -- Pick / Put -------------------------------------------------------

    /// Takes a session out of the pool, waiting while none is idle.
    ///
    /// **The session may be unhealthy.** The pool favors availability: a
    /// session whose last create/validate failed still circulates until
    /// the keepalive loop heals it. Check [`Session::is_ok`] before
    /// relying on the token, and expect your own request to fail if you
    /// use a bad one.
    ///
    /// Every picked session must be handed back with [`put`](Self::put)
    /// (or wrapped in a [`promise`](Self::promise)).
    ///
    /// # Errors
    /// [`PoolError::Closed`] once the pool is closed.
    pub async fn pick(&self) -> Result<Session, PoolError> {
        let session = self.queue.pop().await.ok_or(PoolError::Closed)?;
        self.stats.lease_started();
        trace!(session_id = %session.id(), ok = session.is_ok(), "session picked");
        Ok(session)
    }

    /// Returns a session to the pool.
    ///
    /// Waits while the queue is full, which cannot happen as long as only
    /// picked sessions are put back.
    ///
    /// # Errors
    /// [`PoolError::Closed`] if the pool closed in the meantime; the
    /// session is then closed on the remote side on a best-effort basis.
    pub async fn put(&self, session: Session) -> Result<(), PoolError> {
        let id = session.id();
        let result = self.queue.push(session).await;
        self.stats.lease_ended();
        match result {
            Ok(()) => {
                trace!(session_id = %id, "session put back");
                Ok(())
            }
            Err(session) => {
                warn!(session_id = %id, "session returned after close, closing it");
                self.close_remote(&session).await;
                Err(PoolError::Closed)
            }
        }
    }

    // -- Shutdown ---------------------------------------------------------

    /// Tells the keepalive loop and every promise to wind down.
    ///
    /// Idempotent. Does not close the queue: callers can keep picking
    /// until [`close`](Self::close) runs.
    pub fn signal_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("session pool shutdown signalled");
        }
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Drains the pool and closes every session on the remote side.
    ///
    /// Signals shutdown first so outstanding promises hand their sessions
    /// back, then waits up to `drain_timeout` for every created session
    /// to be queued again. Sessions still leased after that are reported
    /// as `missing`. The keepalive task must have stopped before this is
    /// called; [`daemonize`](crate::daemonize) takes care of that.
    ///
    /// Only the first call does anything; later calls return an empty
    /// report.
    pub async fn close(&self) -> CloseReport {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("close called twice, ignoring");
            return CloseReport::default();
        }
        self.signal_shutdown();

        let expected = self.pool_size_counter();
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut collected = Vec::with_capacity(expected);

        while collected.len() < expected {
            match time::timeout_at(deadline, self.queue.pop()).await {
                Ok(Some(session)) => collected.push(session),
                Ok(None) | Err(_) => break,
            }
        }
        self.queue.close();
        collected.extend(self.queue.drain());

        let mut report = CloseReport {
            missing: expected.saturating_sub(collected.len()),
            ..CloseReport::default()
        };
        if report.missing > 0 {
            warn!(
                missing = report.missing,
                "sessions still leased at close, abandoning them"
            );
        }

        for session in &collected {
            match self.close_remote(session).await {
                CloseOutcome::Closed => report.closed += 1,
                CloseOutcome::Failed => report.failed += 1,
                CloseOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            closed = report.closed,
            failed = report.failed,
            skipped = report.skipped,
            missing = report.missing,
            "session pool closed"
        );
        report
    }

    /// Best-effort CloseSession for one session.
    pub(crate) async fn close_remote(&self, session: &Session) -> CloseOutcome {
        let Some(token) = session.token() else {
            return CloseOutcome::Skipped;
        };

        match self.call(self.service.close_session(token)).await {
            Ok(rs) if rs.status.is_error() || rs.fault.is_some() => {
                match &rs.fault {
                    Some(fault) => {
                        self.stats.fault_errors.record(fault.to_string());
                        warn!(session_id = %session.id(), %fault, "close rejected");
                    }
                    None => {
                        warn!(session_id = %session.id(), status = %rs.status, "close rejected");
                    }
                }
                CloseOutcome::Failed
            }
            Ok(_) => {
                debug!(session_id = %session.id(), "session closed remotely");
                CloseOutcome::Closed
            }
            Err(e) => {
                self.stats.network_errors.record(e.to_string());
                warn!(session_id = %session.id(), error = %e, "close failed");
                CloseOutcome::Failed
            }
        }
    }

    // -- Observability ----------------------------------------------------

    /// Point-in-time counters and recent diagnostics.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            config_pool_size: self.config.pool_size,
            pool_size_counter: self.pool_size_counter(),
            queued: self.queue.len(),
            leased: self.stats.leased.load(Ordering::Acquire),
            bad_sessions: self.stats.bad_sessions(),
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            validated: self.stats.validated.load(Ordering::Relaxed),
            replaced: self.stats.replaced.load(Ordering::Relaxed),
            refreshed: self.stats.refreshed.load(Ordering::Relaxed),
            network_errors: self.stats.network_errors.total(),
            fault_errors: self.stats.fault_errors.total(),
            recent_network_errors: self.stats.network_errors.recent(),
            recent_fault_errors: self.stats.fault_errors.recent(),
            closed: self.queue.is_closed(),
        }
    }
}

/// Resolves once shutdown has been signalled (or the pool is gone).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
