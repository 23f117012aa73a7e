//! Error type for the pool layer.

/// Errors surfaced by [`SessionPool`](crate::SessionPool) and the daemon.
///
/// Transport failures and business faults from the
/// Session Service are recovered inside the pool (bad sessions, counted
/// diagnostics) and never reach callers of `pick`.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `pool_size` is zero. Returned once by `populate`; the queue is
    /// closed so the pool can never silently accept load.
    #[error("pool size is zero, refusing to run an empty pool")]
    ZeroCapacity,

    /// `populate` was called on a pool that is already populated.
    #[error("pool is already populated")]
    AlreadyPopulated,

    /// The pool has been closed (or never opened for zero capacity).
    #[error("session pool is closed")]
    Closed,

    /// Registering for termination signals failed.
    #[error("failed to register signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::other("no signals here");
        let pool_err: PoolError = err.into();
        assert!(matches!(pool_err, PoolError::Signal(_)));
        assert!(pool_err.to_string().contains("no signals here"));
    }

    #[test]
    fn test_zero_capacity_message() {
        assert!(PoolError::ZeroCapacity.to_string().contains("zero"));
    }
}
