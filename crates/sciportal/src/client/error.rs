//! Session service error types.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for session service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Classified failure of a session service call.
///
/// Errors are plain data so they can travel on the event bus and be
/// cloned into every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceError {
    /// The request never produced an HTTP response (connect failure, timeout).
    #[error("Failed to reach session service at {url}: {message}")]
    Transport { url: String, message: String },

    /// HTTP 403: the user has no access to session resources.
    #[error("Not authorized for session service (HTTP 403): {body}")]
    Authorization { body: String },

    /// HTTP 400 on session creation; the body is the backend's diagnostic.
    #[error("Session request rejected: {message}")]
    Validation { message: String },

    /// Any other non-success status, or a success status with a body that
    /// does not match the expected schema.
    #[error("Session service error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
}

/// Error categories, for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    Transport,
    Authorization,
    Validation,
    Server,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceErrorKind::Transport => write!(f, "transport"),
            ServiceErrorKind::Authorization => write!(f, "authorization"),
            ServiceErrorKind::Validation => write!(f, "validation"),
            ServiceErrorKind::Server => write!(f, "server"),
        }
    }
}

impl ServiceError {
    pub fn transport(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: err.to_string(),
        }
    }

    /// Classify a non-success response. 403 is always an authorization
    /// issue; everything else is a server error.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        match status {
            StatusCode::FORBIDDEN => Self::Authorization { body: body.into() },
            _ => Self::Server {
                status: status.as_u16(),
                body: body.into(),
            },
        }
    }

    /// A response with a success status whose body does not fit the schema.
    pub fn malformed(status: StatusCode, detail: impl std::fmt::Display) -> Self {
        Self::Server {
            status: status.as_u16(),
            body: format!("malformed response: {detail}"),
        }
    }

    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            Self::Transport { .. } => ServiceErrorKind::Transport,
            Self::Authorization { .. } => ServiceErrorKind::Authorization,
            Self::Validation { .. } => ServiceErrorKind::Validation,
            Self::Server { .. } => ServiceErrorKind::Server,
        }
    }

    /// HTTP status code, when the failure came with a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { .. } => None,
            Self::Authorization { .. } => Some(403),
            Self::Validation { .. } => Some(400),
            Self::Server { status, .. } => Some(*status),
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Text suitable for the user.
    ///
    /// Authorization failures point the user at requesting access; all other
    /// failures suggest trying again.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authorization { body } if !body.trim().is_empty() => format!(
                "You are not authorized to use session resources ({}). \
                 Request a resource allocation from your portal administrator.",
                body.trim()
            ),
            Self::Authorization { .. } => "You are not authorized to use session resources. \
                 Request a resource allocation from your portal administrator."
                .to_string(),
            Self::Validation { message } => {
                format!("Session request rejected: {}. Adjust the form and try again.", message.trim())
            }
            Self::Transport { .. } => "Unable to reach the session service. \
                 Reload to try again, or contact your portal administrator."
                .to_string(),
            Self::Server { status, .. } => format!(
                "The session service returned an error (HTTP {status}). \
                 Reload to try again, or contact your portal administrator."
            ),
        }
    }
}
