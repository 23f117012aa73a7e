//! Session types: the data structures that represent one remote session.
//!
//! A "session" is the pool's record of one authenticated handle on the
//! remote booking service. It tracks:
//! - WHO it is (`SessionId`, only for correlating log lines)
//! - WHETHER it is usable (`ok` flag, last fault)
//! - HOW to talk through it (the security token)
//! - WHEN it needs looking at again (expiry bookkeeping)

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::Fault;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Short random identifier for a session.
///
/// Only used to correlate log lines; the remote service knows the
/// session by its token, never by this id. 32 random bits are plenty to
/// tell apart the few dozen sessions of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Draws a fresh random id.
    pub fn random() -> Self {
        Self(rand::rng().random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ExpireScheme
// ---------------------------------------------------------------------------

/// Bounds (in minutes) for the randomized expiry of a session.
///
/// Every time a session is created or successfully validated, its next
/// expiry is drawn uniformly from `[min_minutes, max_minutes]`. Spreading
/// expiries keeps a pool populated at one instant from expiring (and
/// hammering the remote service) all at the same instant later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireScheme {
    /// Lower bound, in minutes.
    pub min_minutes: u64,
    /// Upper bound, in minutes.
    pub max_minutes: u64,
}

impl Default for ExpireScheme {
    fn default() -> Self {
        Self {
            min_minutes: 10,
            max_minutes: 14,
        }
    }
}

impl ExpireScheme {
    /// Largest bound, in minutes, a pool accepts (one week).
    pub const MAX_MINUTES: u64 = 7 * 24 * 60;

    /// Creates a scheme from minute bounds.
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
        }
    }

    /// Draws the time-to-expiry for a freshly created or validated session.
    ///
    /// The draw has one-second resolution. A degenerate range
    /// (`min >= max`) always yields `min`.
    pub fn draw(&self) -> Duration {
        let lo = self.min_minutes.saturating_mul(60);
        let hi = self.max_minutes.saturating_mul(60);
        if lo >= hi {
            return Duration::from_secs(lo);
        }
        Duration::from_secs(rand::rng().random_range(lo..=hi))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One pooled remote session.
///
/// A `Session` is a plain value: whoever holds it owns it. The pool hands
/// it out by *moving* it out of its queue, so two callers can never hold
/// the same session at once.
///
/// # Health
///
/// `is_ok() == false` means the last create or validate call against the
/// Session Service failed. Such sessions still circulate (the pool
/// prefers handing out a possibly-dead session over starving callers)
/// and get healed on the next keepalive pass. Callers must check
/// [`is_ok`](Self::is_ok) (or the outcome of their own request) before
/// trusting the token.
///
/// `Session` is not `Clone`: a copy would let two holders put the same
/// remote session back.
///
/// ```compile_fail
/// use std::time::Duration;
/// use warmpool_session::Session;
///
/// let session = Session::healthy("tok".into(), Duration::from_secs(60));
/// let copy = session.clone();
/// ```
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    security_token: Option<String>,
    ok: bool,
    fault: Option<Fault>,
    time_started: Instant,
    time_validated: Option<Instant>,
    expire_at: Instant,
}

impl Session {
    /// Longest time-to-expiry a session takes; longer values are capped.
    pub const MAX_EXPIRE_IN: Duration = Duration::from_secs(ExpireScheme::MAX_MINUTES * 60);

    /// A session the remote service just handed out a token for.
    pub fn healthy(token: String, expire_in: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::random(),
            security_token: Some(token),
            ok: true,
            fault: None,
            time_started: now,
            time_validated: None,
            expire_at: now + expire_in.min(Self::MAX_EXPIRE_IN),
        }
    }

    /// A session whose creation failed.
    ///
    /// It carries no token and is due for attention immediately, so the
    /// first keepalive pass replaces it.
    pub fn bad(fault: Option<Fault>) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::random(),
            security_token: None,
            ok: false,
            fault,
            time_started: now,
            time_validated: None,
            expire_at: now,
        }
    }

    /// Log-correlation id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// `true` if the last create/validate call succeeded.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// The cached security token, if the service ever issued one.
    pub fn token(&self) -> Option<&str> {
        self.security_token.as_deref()
    }

    /// Last business-level fault reported for this session.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// When the session was created.
    pub fn time_started(&self) -> Instant {
        self.time_started
    }

    /// When the session last passed validation, if ever.
    pub fn time_validated(&self) -> Option<Instant> {
        self.time_validated
    }

    /// When the session is next due for validation.
    pub fn expire_at(&self) -> Instant {
        self.expire_at
    }

    /// `true` once `now` is past the expiry instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expire_at
    }

    /// Whether the keepalive loop should validate this session.
    pub fn needs_validation(&self, now: Instant) -> bool {
        !self.ok || self.is_expired_at(now)
    }

    /// Records a successful validation.
    ///
    /// The token is only replaced when the service returned a non-empty
    /// one; some endpoints answer validation without re-issuing it.
    pub fn mark_validated(&mut self, token: Option<String>, expire_in: Duration) {
        let now = Instant::now();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.security_token = Some(token);
        }
        self.ok = true;
        self.fault = None;
        self.time_validated = Some(now);
        self.expire_at = now + expire_in.min(Self::MAX_EXPIRE_IN);
    }

    /// Records a business-level rejection that did not kill the session.
    pub fn mark_faulted(&mut self, fault: Fault) {
        self.ok = false;
        self.fault = Some(fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display_is_eight_hex_chars() {
        assert_eq!(SessionId(0xab).to_string(), "000000ab");
        assert_eq!(SessionId::random().to_string().len(), 8);
    }

    #[test]
    fn test_expire_draw_stays_within_bounds() {
        let scheme = ExpireScheme::new(2, 5);
        for _ in 0..200 {
            let d = scheme.draw();
            assert!(d >= Duration::from_secs(120), "{d:?} below min");
            assert!(d <= Duration::from_secs(300), "{d:?} above max");
        }
    }

    #[test]
    fn test_expire_draw_degenerate_range_returns_min() {
        assert_eq!(ExpireScheme::new(3, 3).draw(), Duration::from_secs(180));
        assert_eq!(ExpireScheme::new(7, 1).draw(), Duration::from_secs(420));
        assert_eq!(ExpireScheme::new(0, 0).draw(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_session_not_due_until_expiry() {
        let session = Session::healthy("tok".into(), Duration::from_secs(60));
        assert!(session.is_ok());
        assert_eq!(session.token(), Some("tok"));
        assert!(!session.needs_validation(Instant::now()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(session.needs_validation(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_session_is_due_immediately() {
        let session = Session::bad(None);
        assert!(!session.is_ok());
        assert!(session.token().is_none());
        assert!(session.needs_validation(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_validated_keeps_token_when_service_sends_none() {
        let mut session = Session::bad(Some(Fault::new("E1", "nope")));
        session.mark_validated(Some("fresh".into()), Duration::from_secs(30));
        assert!(session.is_ok());
        assert!(session.fault().is_none());
        assert_eq!(session.token(), Some("fresh"));
        assert!(session.time_validated().is_some());

        session.mark_validated(Some(String::new()), Duration::from_secs(30));
        assert_eq!(session.token(), Some("fresh"));
        session.mark_validated(None, Duration::from_secs(30));
        assert_eq!(session.token(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_expiry_is_capped_instead_of_overflowing() {
        let now = Instant::now();
        let mut session = Session::healthy("tok".into(), Duration::MAX);
        assert!(session.expire_at() <= now + Session::MAX_EXPIRE_IN);

        session.mark_validated(None, ExpireScheme::new(u64::MAX / 2, u64::MAX).draw());
        assert_eq!(session.expire_at(), Instant::now() + Session::MAX_EXPIRE_IN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_faulted_flips_health_but_keeps_token() {
        let mut session = Session::healthy("tok".into(), Duration::from_secs(60));
        session.mark_faulted(Fault::new("USG_AUTH", "session busy"));
        assert!(!session.is_ok());
        assert_eq!(session.token(), Some("tok"));
        assert_eq!(session.fault().map(|f| f.code.as_str()), Some("USG_AUTH"));
    }
}
