//! Session service wire types and endpoint descriptions.

use serde::{Deserialize, Serialize};

/// Endpoint URLs of the session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    /// Sessions collection (`GET`/`POST`, `DELETE {sessions}/{id}`).
    pub sessions: String,
    /// Container image catalog (`GET {images}?type=...`).
    pub images: String,
    /// Server context resources (`GET {context}`).
    pub context: String,
}

impl ServiceUrls {
    /// Derive the standard endpoints from the service base URL.
    pub fn from_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            sessions: format!("{base}/session"),
            images: format!("{base}/image"),
            context: format!("{base}/context"),
        }
    }

    pub(crate) fn session(&self, session_id: &str) -> String {
        format!("{}/{}", self.sessions.trim_end_matches('/'), session_id)
    }
}

/// Credentials attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Raw `Cookie` header value (e.g. an SSO session cookie).
    pub cookie: Option<String>,
    /// Bearer token sent in the `Authorization` header.
    pub bearer_token: Option<String>,
}

/// A container image available for a session type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// Image reference, also used as its display name.
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Server-wide resource choices for new sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextResources {
    #[serde(rename = "availableCores")]
    pub available_cores: Vec<u32>,
    #[serde(rename = "defaultCores")]
    pub default_cores: u32,
    #[serde(rename = "availableRAM")]
    pub available_ram: Vec<u32>,
    #[serde(rename = "defaultRAM")]
    pub default_ram: u32,
}

impl ContextResources {
    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.available_cores.is_empty() {
            return Err("availableCores is empty".to_string());
        }
        if self.available_ram.is_empty() {
            return Err("availableRAM is empty".to_string());
        }
        Ok(())
    }
}
