//! Lifecycle event types published to presentation code.

use serde::Serialize;

use crate::client::ServiceError;
use crate::session::{PollOutcome, Session};

/// Events emitted by the session coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortalEvent {
    /// A session list load finished; `sessions` is the newest known list.
    LoadSessionListDone { sessions: Vec<Session> },

    /// A session list load failed.
    LoadSessionListError { error: ServiceError },

    /// A new session request was accepted by the backend.
    SessionRequestOk { name: String, session_type: String },

    /// A session was deleted.
    SessionDeleteOk { session_id: String },

    /// A poll tick completed; carries the list to repaint.
    PollingContinue { sessions: Vec<Session> },

    /// A polling run ended with a stable list or a failure.
    PollingFinished { outcome: PollOutcome },
}

impl PortalEvent {
    /// Topic name, as used in logs.
    pub fn topic(&self) -> &'static str {
        match self {
            PortalEvent::LoadSessionListDone { .. } => "load_session_list_done",
            PortalEvent::LoadSessionListError { .. } => "load_session_list_error",
            PortalEvent::SessionRequestOk { .. } => "session_request_ok",
            PortalEvent::SessionDeleteOk { .. } => "session_delete_ok",
            PortalEvent::PollingContinue { .. } => "polling_continue",
            PortalEvent::PollingFinished { .. } => "polling_finished",
        }
    }
}
