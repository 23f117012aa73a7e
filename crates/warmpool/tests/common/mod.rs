//! Scriptable in-memory Session Service shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use warmpool::{
    ActionStatus, CloseSessionRS, CreateSessionRS, Fault, ServiceError,
    SessionService, ValidateSessionRS,
};

/// Knobs and counters of the mock. Flip knobs with [`MockService::set`].
#[derive(Debug, Default)]
pub struct MockState {
    /// Every call fails with a network error.
    pub unreachable: bool,
    /// CreateSession answers with a fault and no token.
    pub create_fault: bool,
    /// ValidateSession fails with a network error.
    pub validate_unreachable: bool,
    /// ValidateSession never answers.
    pub validate_hangs: bool,
    /// ValidateSession answers `ErrorRS`.
    pub validate_error_rs: bool,
    /// ValidateSession answers with a non-fatal fault.
    pub validate_fault: bool,
    /// CloseSession answers `ErrorRS` without a fault.
    pub close_error_rs: bool,
    /// Token handed back by a successful validation.
    pub reissued_token: Option<String>,

    pub next_token: u64,
    pub creates: usize,
    pub validates: usize,
    pub closed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockService {
    state: Mutex<MockState>,
}

impl MockService {
    pub fn unreachable() -> Self {
        let service = Self::default();
        service.set(|s| s.unreachable = true);
        service
    }

    pub fn set(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock());
    }

    pub fn creates(&self) -> usize {
        self.state.lock().creates
    }

    pub fn validates(&self) -> usize {
        self.state.lock().validates
    }

    pub fn closed(&self) -> Vec<String> {
        self.state.lock().closed.clone()
    }
}

impl SessionService for MockService {
    async fn create_session(&self) -> Result<CreateSessionRS, ServiceError> {
        let mut st = self.state.lock();
        st.creates += 1;
        if st.unreachable {
            return Err(ServiceError::Network("connection refused".into()));
        }
        if st.create_fault {
            return Ok(CreateSessionRS {
                token: None,
                fault: Some(Fault::new("ERR.SWS.AUTH", "bad credentials")),
            });
        }
        st.next_token += 1;
        Ok(CreateSessionRS {
            token: Some(format!("tok-{}", st.next_token)),
            fault: None,
        })
    }

    async fn validate_session(
        &self,
        token: &str,
    ) -> Result<ValidateSessionRS, ServiceError> {
        let hangs = self.state.lock().validate_hangs;
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut st = self.state.lock();
        st.validates += 1;
        if st.unreachable || st.validate_unreachable {
            return Err(ServiceError::Network("connection reset".into()));
        }
        if st.validate_error_rs {
            return Ok(ValidateSessionRS {
                token: None,
                status: ActionStatus::Error,
                fault: Some(Fault::new("ERR.SWS.CLIENT", "invalid session")),
            });
        }
        if st.validate_fault {
            return Ok(ValidateSessionRS {
                token: None,
                status: ActionStatus::Complete,
                fault: Some(Fault::new("ERR.SWS.BUSY", "try again")),
            });
        }
        Ok(ValidateSessionRS {
            token: Some(st.reissued_token.clone().unwrap_or_else(|| token.to_string())),
            status: ActionStatus::Complete,
            fault: None,
        })
    }

    async fn close_session(&self, token: &str) -> Result<CloseSessionRS, ServiceError> {
        let mut st = self.state.lock();
        if st.unreachable {
            return Err(ServiceError::Network("connection refused".into()));
        }
        if st.close_error_rs {
            return Ok(CloseSessionRS {
                status: ActionStatus::Error,
                fault: None,
            });
        }
        st.closed.push(token.to_string());
        Ok(CloseSessionRS {
            status: ActionStatus::Complete,
            fault: None,
        })
    }
}
