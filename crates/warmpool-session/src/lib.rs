//! Session entity and Session Service contract for warmpool.
//!
//! This crate defines the two things the pool moves around and talks to:
//!
//! 1. **Sessions**: one authenticated handle to the remote booking
//!    protocol ([`Session`]), with its token, health flag and expiry
//!    bookkeeping
//! 2. **The Session Service**: the remote create/validate/close calls
//!    ([`SessionService`] trait), which the host application implements
//!    on top of its own protocol client
//!
//! # How it fits in the stack
//!
//! ```text
//! Caller code (above)  ← picks sessions, uses their tokens in requests
//!     ↕
//! Pool Layer (warmpool)  ← keeps sessions warm, heals and rotates them
//!     ↕
//! Session Layer (this crate)  ← session state + service contract
//!     ↕
//! Protocol client (host application)  ← SOAP/XML, out of scope here
//! ```

mod error;
mod service;
mod session;

pub use error::ServiceError;
pub use service::{
    ActionStatus, CloseSessionRS, CreateSessionRS, Fault, SessionService,
    ValidateSessionRS,
};
pub use session::{ExpireScheme, Session, SessionId};
