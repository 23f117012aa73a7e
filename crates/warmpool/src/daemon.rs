//! Daemon orchestration: populate, keep alive, shut down on signal.
//!
//! This is the one place where termination signals and pool shutdown
//! meet. The ordering is strict:
//!
//! ```text
//! register signals → populate → spawn keepalive → wait for signal
//!     → signal_shutdown → join keepalive → close
//! ```
//!
//! Close only starts once the keepalive task has fully stopped, so no
//! session can be processed by both at the same time.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use warmpool_session::SessionService;

use crate::pool::{CloseReport, shutdown_requested};
use crate::{PoolError, SessionPool};

/// Process signals the daemon can treat as "terminate".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
}

impl TerminationSignal {
    /// SIGINT and SIGTERM: what service managers and terminals send.
    pub const DEFAULT: [TerminationSignal; 2] = [Self::Interrupt, Self::Terminate];

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Hangup => SignalKind::hangup(),
            Self::Quit => SignalKind::quit(),
        }
    }
}

/// Runs the pool for the life of the process.
///
/// Registers for `signals` before doing anything else (an empty list
/// means [`TerminationSignal::DEFAULT`]), populates the pool, starts the
/// keepalive loop and blocks until one of the signals arrives. Then stops
/// the keepalive loop, waits for it, and closes the pool.
///
/// # Errors
/// - [`PoolError::Signal`] if a signal handler cannot be registered.
/// - Anything [`SessionPool::populate`] returns.
pub async fn daemonize<S: SessionService>(
    pool: Arc<SessionPool<S>>,
    signals: &[TerminationSignal],
) -> Result<CloseReport, PoolError> {
    let listener = SignalListener::register(signals)?;
    run_until(pool, listener.recv()).await
}

/// [`daemonize`] driven by an arbitrary shutdown future instead of
/// process signals.
///
/// Also returns when something else calls
/// [`SessionPool::signal_shutdown`].
pub async fn run_until<S, F>(
    pool: Arc<SessionPool<S>>,
    shutdown: F,
) -> Result<CloseReport, PoolError>
where
    S: SessionService,
    F: Future<Output = ()>,
{
    pool.populate().await?;
    let keepalive = pool.spawn_keepalive();
    info!(pool_size = pool.config().pool_size, "session pool daemon running");

    let mut pool_shutdown = pool.subscribe_shutdown();
    tokio::select! {
        _ = shutdown => info!("termination requested"),
        _ = shutdown_requested(&mut pool_shutdown) => info!("pool shutdown requested"),
    }

    pool.signal_shutdown();
    if let Err(e) = keepalive.await {
        error!(error = %e, "keepalive task ended abnormally");
    }
    Ok(pool.close().await)
}

/// Fans several signal streams into one channel.
struct SignalListener {
    rx: mpsc::Receiver<TerminationSignal>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalListener {
    fn register(signals: &[TerminationSignal]) -> Result<Self, PoolError> {
        let signals = if signals.is_empty() {
            &TerminationSignal::DEFAULT[..]
        } else {
            signals
        };

        let (tx, rx) = mpsc::channel(1);
        let mut tasks = Vec::with_capacity(signals.len());

        for &signal in signals {
            tasks.push(Self::listen(signal, tx.clone())?);
        }

        Ok(Self { rx, tasks })
    }

    #[cfg(unix)]
    fn listen(
        signal: TerminationSignal,
        tx: mpsc::Sender<TerminationSignal>,
    ) -> Result<JoinHandle<()>, PoolError> {
        let mut stream = tokio::signal::unix::signal(signal.kind())?;
        Ok(tokio::spawn(async move {
            if stream.recv().await.is_some() {
                let _ = tx.send(signal).await;
            }
        }))
    }

    #[cfg(not(unix))]
    fn listen(
        signal: TerminationSignal,
        tx: mpsc::Sender<TerminationSignal>,
    ) -> Result<JoinHandle<()>, PoolError> {
        // Only Ctrl-C is portable; every requested signal maps onto it.
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(signal).await;
            }
        }))
    }

    async fn recv(mut self) {
        match self.rx.recv().await {
            Some(signal) => info!(?signal, "received termination signal"),
            None => std::future::pending::<()>().await,
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
