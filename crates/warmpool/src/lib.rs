//! # warmpool
//!
//! A warm pool of pre-authenticated sessions for stateful booking
//! protocols.
//!
//! Opening a session against the remote service is slow and costs money,
//! so instead of opening one per request, warmpool keeps a fixed number of
//! them alive and hands them out:
//!
//! - [`SessionPool`]: populate, [`pick`](SessionPool::pick) /
//!   [`put`](SessionPool::put), [`close`](SessionPool::close)
//! - keepalive loop: validates expiring sessions, replaces dead ones,
//!   rotates a few proactively ([`SessionPool::spawn_keepalive`])
//! - [`Promise`]: keep one session for a multi-step flow, with timeout
//! - [`daemonize`]: the whole lifecycle, stopped by a process signal
//!
//! The remote calls themselves go through a [`SessionService`] you
//! implement.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warmpool::prelude::*;
//!
//! # async fn run(service: impl SessionService) -> Result<(), PoolError> {
//! let pool = PoolBuilder::new()
//!     .pool_size(20)
//!     .expire_scheme(10, 14)
//!     .build(service);
//!
//! let report = daemonize(pool, &TerminationSignal::DEFAULT).await?;
//! println!("closed {} sessions", report.closed);
//! # Ok(())
//! # }
//! ```

mod config;
mod daemon;
mod error;
mod keepalive;
mod pool;
mod promise;
mod queue;
mod stats;

pub use config::PoolConfig;
pub use daemon::{TerminationSignal, daemonize, run_until};
pub use error::PoolError;
pub use keepalive::PassReport;
pub use pool::{CloseReport, PoolBuilder, SessionPool};
pub use promise::{Promise, ReleaseReason};
pub use stats::PoolSnapshot;

pub use warmpool_session::{
    ActionStatus, CloseSessionRS, CreateSessionRS, ExpireScheme, Fault,
    ServiceError, Session, SessionId, SessionService, ValidateSessionRS,
};

/// Everything needed to build and run a pool.
pub mod prelude {
    pub use crate::{
        ActionStatus, CloseReport, CloseSessionRS, CreateSessionRS, PoolBuilder,
        PoolConfig, PoolError, PoolSnapshot, Promise, ReleaseReason,
        ServiceError, Session, SessionPool, SessionService, TerminationSignal,
        ValidateSessionRS, daemonize, run_until,
    };
}
