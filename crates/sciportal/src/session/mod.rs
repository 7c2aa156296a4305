//! Session management module.
//!
//! Handles the lifecycle of remote compute sessions: discovery, polling
//! until the list settles, creation and deletion.

mod coordinator;
mod models;
mod polling;

pub use coordinator::{ConnectError, CoordinatorPhase, SessionCoordinator};
pub use models::{Session, SessionForm, SessionRequest, SessionStatus, StatusPolicy};
pub use polling::{PollHandle, PollObserver, PollOutcome, PollingConfig, PollingEngine};
