//! Upstream event-bus client: session state machine and subscription
//! catalog.

pub mod session;
pub mod subscribe;

pub use session::{EventSession, EventSessionContext, SessionNotice, SessionStatus, StatusSnapshot};
