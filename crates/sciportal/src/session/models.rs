//! Session data models.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Session status as reported by the backend.
///
/// The vocabulary is owned by the backend. Values this crate does not know
/// are preserved verbatim in [`SessionStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    /// Session is scheduled but the container is not up yet.
    Pending,
    /// Container is running and can be connected to.
    Running,
    /// Container is being torn down.
    Terminating,
    /// Container exited cleanly.
    Succeeded,
    /// Container exited with a failure.
    Failed,
    /// Backend could not run the session.
    Error,
    /// Any status the backend reports that is not listed above.
    Other(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Pending => "Pending",
            SessionStatus::Running => "Running",
            SessionStatus::Terminating => "Terminating",
            SessionStatus::Succeeded => "Succeeded",
            SessionStatus::Failed => "Failed",
            SessionStatus::Error => "Error",
            SessionStatus::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SessionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Pending" => SessionStatus::Pending,
            "Running" => SessionStatus::Running,
            "Terminating" => SessionStatus::Terminating,
            "Succeeded" => SessionStatus::Succeeded,
            "Failed" => SessionStatus::Failed,
            "Error" => SessionStatus::Error,
            _ => SessionStatus::Other(value),
        }
    }
}

impl From<&str> for SessionStatus {
    fn from(value: &str) -> Self {
        SessionStatus::from(value.to_string())
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

/// A remote compute session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID, stable for the session lifetime.
    pub id: String,
    /// User-assigned label.
    pub name: String,
    /// Session kind (notebook, desktop, carta, ...).
    #[serde(rename = "type")]
    pub session_type: String,
    /// Current session status.
    pub status: SessionStatus,
    /// Connect URL, only populated once the session is usable.
    #[serde(
        rename = "connectURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_url: Option<String>,
    /// Container image the session runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// When the backend started the session.
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

impl Session {
    /// A session is usable (connectable) only while it is running.
    pub fn is_usable(&self) -> bool {
        self.status == SessionStatus::Running
    }
}

/// Form fields submitted when requesting a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionForm {
    pub name: String,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<u32>,
}

impl SessionForm {
    pub fn new(name: impl Into<String>, session_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_type: session_type.into(),
            image: None,
            cores: None,
            ram: None,
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn cores(mut self, cores: u32) -> Self {
        self.cores = Some(cores);
        self
    }

    pub fn ram(mut self, ram: u32) -> Self {
        self.ram = Some(ram);
        self
    }
}

/// What the backend acknowledges for an accepted session request.
///
/// The backend does not return the created session, so only the submitted
/// name and type identify the request until the next list load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub session_type: String,
}

impl From<&SessionForm> for SessionRequest {
    fn from(form: &SessionForm) -> Self {
        Self {
            name: form.name.clone(),
            session_type: form.session_type.clone(),
        }
    }
}

/// Which statuses are transient.
///
/// A session list is stable when no session is in a transient status.
/// Every status outside the transient set, including unknown ones, is
/// treated as stable so polling never spins on vocabulary it cannot read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    transient: BTreeSet<SessionStatus>,
}

impl StatusPolicy {
    pub fn new<I, S>(transient: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionStatus>,
    {
        Self {
            transient: transient.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_transient(&self, status: &SessionStatus) -> bool {
        self.transient.contains(status)
    }

    pub fn is_stable(&self, sessions: &[Session]) -> bool {
        !sessions.iter().any(|s| self.is_transient(&s.status))
    }

    pub fn transient_statuses(&self) -> impl Iterator<Item = &SessionStatus> {
        self.transient.iter()
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::new([SessionStatus::Pending, SessionStatus::Terminating])
    }
}
