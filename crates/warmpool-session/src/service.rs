//! The Session Service contract.
//!
//! warmpool doesn't speak the remote protocol itself. Building SOAP
//! envelopes and parsing their answers is the host application's job.
//! Instead it defines the [`SessionService`] trait: three async calls the
//! pool needs in order to create, keep alive, and close sessions. You
//! implement the trait on top of your protocol client, and the pool calls
//! it from Populate, the keepalive loop, and Close.
//!
//! Endpoint, credentials and wire format are all owned by the
//! implementor; the pool only ever sees tokens and outcomes.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::ServiceError;

/// A business-level rejection from the remote service.
///
/// The service was reachable and answered, but refused the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Service-specific fault code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl Fault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome status of a validation call.
///
/// The wire values mirror the booking protocol's `ActionStatus`
/// attribute. Only [`ActionStatus::Error`] (`"ErrorRS"`) has control-flow
/// meaning to the pool: the session is gone and must be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Complete,
    Incomplete,
    NotProcessed,
    /// `"ErrorRS"`: the remote side considers the session unrecoverable.
    Error,
    /// Any value this crate doesn't know about.
    Other(String),
}

impl ActionStatus {
    /// The protocol's spelling of this status.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Complete => "Complete",
            Self::Incomplete => "Incomplete",
            Self::NotProcessed => "NotProcessed",
            Self::Error => "ErrorRS",
            Self::Other(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl FromStr for ActionStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Complete" => Self::Complete,
            "Incomplete" => Self::Incomplete,
            "NotProcessed" => Self::NotProcessed,
            "ErrorRS" => Self::Error,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Answer to `CreateSession`.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRS {
    /// The new session's security token. Empty or missing means the
    /// service did not actually open a session.
    pub token: Option<String>,
    pub fault: Option<Fault>,
}

/// Answer to `ValidateSession`.
#[derive(Debug, Clone)]
pub struct ValidateSessionRS {
    /// A re-issued token, if the service sends one.
    pub token: Option<String>,
    pub status: ActionStatus,
    pub fault: Option<Fault>,
}

/// Answer to `CloseSession`.
#[derive(Debug, Clone)]
pub struct CloseSessionRS {
    pub status: ActionStatus,
    pub fault: Option<Fault>,
}

/// The remote calls the pool needs.
///
/// # Trait bounds
///
/// - `Send + Sync` → one service instance is shared by the keepalive task,
///   every caller task and every promise watcher.
/// - `'static` → it lives as long as the pool.
///
/// Each call is one network round trip. The pool wraps every call in its
/// own timeout, so implementations don't have to, but they must return
/// [`ServiceError`] for transport problems and put business rejections in
/// the response's `fault` field.
///
/// # Example
///
/// ```rust
/// use warmpool_session::{
///     ActionStatus, CloseSessionRS, CreateSessionRS, ServiceError,
///     SessionService, ValidateSessionRS,
/// };
///
/// /// Hands out tokens without talking to anybody. Tests only!
/// struct OfflineService;
///
/// impl SessionService for OfflineService {
///     async fn create_session(&self) -> Result<CreateSessionRS, ServiceError> {
///         Ok(CreateSessionRS { token: Some("offline".into()), fault: None })
///     }
///
///     async fn validate_session(
///         &self,
///         token: &str,
///     ) -> Result<ValidateSessionRS, ServiceError> {
///         Ok(ValidateSessionRS {
///             token: Some(token.to_string()),
///             status: ActionStatus::Complete,
///             fault: None,
///         })
///     }
///
///     async fn close_session(
///         &self,
///         _token: &str,
///     ) -> Result<CloseSessionRS, ServiceError> {
///         Ok(CloseSessionRS { status: ActionStatus::Complete, fault: None })
///     }
/// }
/// ```
pub trait SessionService: Send + Sync + 'static {
    /// Opens a new remote session.
    fn create_session(
        &self,
    ) -> impl Future<Output = Result<CreateSessionRS, ServiceError>> + Send;

    /// Checks (and usually extends) the session behind `token`.
    ///
    /// `status == ActionStatus::Error` tells the pool the session is dead.
    fn validate_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<ValidateSessionRS, ServiceError>> + Send;

    /// Closes the session behind `token` on the remote side.
    fn close_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<CloseSessionRS, ServiceError>> + Send;
}
