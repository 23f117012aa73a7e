//! Promises: exclusive, time-bounded leases on one session.
//!
//! The remote protocol is stateful: a multi-step booking flow has to
//! run through the *same* session from start to finish. A [`Promise`]
//! takes a picked session out of circulation for such a flow and
//! guarantees it goes back to the pool exactly once, on whichever comes
//! first:
//!
//! ```text
//!            +-- release() / handle dropped --+
//!  promise --+-- idle timeout elapsed --------+--> put back (once)
//!            +-- pool shutdown signalled -----+
//! ```
//!
//! A watcher task waits on all three. The session itself sits in a
//! single slot that whoever returns it must `take()`, so a double return
//! is impossible no matter how the three paths race.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use warmpool_session::{Session, SessionId, SessionService};

use crate::pool::shutdown_requested;
use crate::{PoolConfig, PoolError, SessionPool};

/// Which path returned a promised session to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The holder released it (explicitly or by dropping the handle).
    Released,
    /// Nobody touched it for the whole idle timeout.
    TimedOut,
    /// The pool is shutting down.
    Shutdown,
}

/// Commands from a [`Promise`] handle to its watcher task.
enum LeaseCommand {
    /// Restart the idle timeout.
    Touch,
    /// Give the session back now.
    Release,
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Handle to a promised session.
///
/// Dropping the handle releases the session, same as
/// [`release`](Self::release) without waiting for the outcome.
pub struct Promise {
    session_id: SessionId,
    slot: Slot,
    commands: mpsc::UnboundedSender<LeaseCommand>,
    watcher: Option<JoinHandle<ReleaseReason>>,
}

impl Promise {
    /// Id of the promised session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Runs `f` against the promised session.
    ///
    /// Returns `None` if the session already went back to the pool
    /// (timeout or shutdown). Keep `f` short: the watcher cannot return
    /// the session while it runs.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.slot.lock().as_mut().map(f)
    }

    /// The session's token, while still held.
    pub fn token(&self) -> Option<String> {
        self.with_session(|s| s.token().map(str::to_owned)).flatten()
    }

    /// `true` until the session has gone back to the pool.
    pub fn is_held(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Restarts the idle timeout. Call between steps of a long flow.
    pub fn touch(&self) {
        let _ = self.commands.send(LeaseCommand::Touch);
    }

    /// Returns the session to the pool and reports which path did it.
    ///
    /// If the timeout or shutdown already fired, this just reports that.
    pub async fn release(mut self) -> ReleaseReason {
        let _ = self.commands.send(LeaseCommand::Release);
        match self.watcher.take() {
            // A join error only happens when the runtime itself is going
            // away, which is a shutdown from the session's point of view.
            Some(watcher) => watcher.await.unwrap_or(ReleaseReason::Shutdown),
            None => ReleaseReason::Released,
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if self.watcher.is_some() {
            let _ = self.commands.send(LeaseCommand::Release);
        }
    }
}

impl<S: SessionService> SessionPool<S> {
    /// Takes `session` (previously picked) out of circulation until
    /// released, idle for `promise_timeout`, or shutdown.
    pub fn promise(self: &Arc<Self>, session: Session) -> Promise {
        self.promise_with_timeout(session, self.config.promise_timeout)
    }

    /// Like [`promise`](Self::promise) with an explicit idle timeout,
    /// capped at [`PoolConfig::MAX_WAIT`](crate::PoolConfig::MAX_WAIT).
    pub fn promise_with_timeout(
        self: &Arc<Self>,
        session: Session,
        timeout: Duration,
    ) -> Promise {
        let timeout = timeout.min(PoolConfig::MAX_WAIT);
        let session_id = session.id();
        let slot: Slot = Arc::new(Mutex::new(Some(session)));
        let (commands, rx) = mpsc::unbounded_channel();

        let watcher = tokio::spawn(watch_lease(
            Arc::clone(self),
            Arc::clone(&slot),
            rx,
            timeout,
        ));

        debug!(
            %session_id,
            timeout_secs = timeout.as_secs_f64(),
            "session promised"
        );

        Promise {
            session_id,
            slot,
            commands,
            watcher: Some(watcher),
        }
    }

    /// Picks a session and promises it in one step.
    ///
    /// # Errors
    /// [`PoolError::Closed`] once the pool is closed.
    pub async fn pick_promise(self: &Arc<Self>) -> Result<Promise, PoolError> {
        let session = self.pick().await?;
        Ok(self.promise(session))
    }
}

/// Waits for exactly one of release / timeout / shutdown, then returns
/// the session.
async fn watch_lease<S: SessionService>(
    pool: Arc<SessionPool<S>>,
    slot: Slot,
    mut commands: mpsc::UnboundedReceiver<LeaseCommand>,
    timeout: Duration,
) -> ReleaseReason {
    let mut shutdown = pool.subscribe_shutdown();
    let idle = time::sleep(timeout);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(LeaseCommand::Touch) => idle.as_mut().reset(Instant::now() + timeout),
                // All handles gone counts as a release.
                Some(LeaseCommand::Release) | None => break ReleaseReason::Released,
            },
            _ = &mut idle => break ReleaseReason::TimedOut,
            _ = shutdown_requested(&mut shutdown) => break ReleaseReason::Shutdown,
        }
    };

    let session = slot.lock().take();
    if let Some(session) = session {
        let session_id = session.id();
        match pool.put(session).await {
            Ok(()) => debug!(%session_id, ?reason, "promised session returned"),
            Err(e) => warn!(%session_id, ?reason, error = %e, "promised session not returned"),
        }
    }
    reason
}
