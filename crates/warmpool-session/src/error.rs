//! Error types for the session layer.

use std::time::Duration;

/// Transport-level failures talking to the Session Service.
///
/// These are always recovered locally by the pool: the session involved
/// is marked bad (or left untouched during validation) and the error is
/// counted in the pool's diagnostics. Business-level rejections are NOT
/// errors; they arrive as a [`Fault`](crate::Fault) inside an `Ok`
/// response.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The remote endpoint could not be reached (DNS, connect, reset...).
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete within the configured per-call timeout.
    #[error("session service call timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered, but with something we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}
