//! Session service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::error::{ServiceError, ServiceResult};
use super::types::{ContainerImage, ContextResources, Credentials, ServiceUrls};
use crate::session::{Session, SessionForm, SessionRequest};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The network operations the coordinator and launch form depend on.
///
/// Every call is one-shot: implementations never retry.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// List the user's sessions.
    async fn list_sessions(&self) -> ServiceResult<Vec<Session>>;

    /// Request a new session. Success means "submitted", not "running".
    async fn create_session(&self, form: &SessionForm) -> ServiceResult<SessionRequest>;

    /// Delete a session.
    async fn delete_session(&self, session_id: &str) -> ServiceResult<()>;

    /// List container images for a session type.
    async fn list_container_images(&self, session_type: &str) -> ServiceResult<Vec<ContainerImage>>;

    /// Fetch the server-wide core/RAM choices.
    async fn get_context_resources(&self) -> ServiceResult<ContextResources>;
}

/// Client for the session web service.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: Client,
    urls: ServiceUrls,
}

impl PortalClient {
    /// Create a client with the default timeout.
    pub fn new(urls: ServiceUrls, credentials: &Credentials) -> ServiceResult<Self> {
        Self::with_timeout(urls, credentials, DEFAULT_TIMEOUT)
    }

    /// Create a client. Credentials are attached to every request.
    pub fn with_timeout(
        urls: ServiceUrls,
        credentials: &Credentials,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = credentials.cookie.as_deref() {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ServiceError::transport(&urls.sessions, format!("invalid cookie: {e}")))?;
            headers.insert(COOKIE, value);
        }
        if let Some(token) = credentials.bearer_token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ServiceError::transport(&urls.sessions, format!("invalid token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ServiceError::transport(&urls.sessions, e))?;

        Ok(Self { client, urls })
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    /// Read a `200 OK` JSON body, classifying every other outcome.
    async fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> ServiceResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::transport(url, e))?;

        if status != StatusCode::OK {
            warn!(%url, status = status.as_u16(), "session service returned an error");
            return Err(ServiceError::from_status(status, body));
        }

        serde_json::from_str(&body).map_err(|e| ServiceError::malformed(status, e))
    }
}

#[async_trait]
impl SessionApi for PortalClient {
    #[instrument(skip(self), fields(url = %self.urls.sessions))]
    async fn list_sessions(&self) -> ServiceResult<Vec<Session>> {
        let url = &self.urls.sessions;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::transport(url, e))?;

        let sessions: Vec<Session> = Self::read_json(url, response).await?;
        debug!(count = sessions.len(), "listed sessions");
        Ok(sessions)
    }

    #[instrument(skip(self, form), fields(name = %form.name, session_type = %form.session_type))]
    async fn create_session(&self, form: &SessionForm) -> ServiceResult<SessionRequest> {
        let url = &self.urls.sessions;
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::transport(url, e))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                debug!("session request accepted");
                Ok(SessionRequest::from(form))
            }
            StatusCode::BAD_REQUEST => {
                let message = response
                    .text()
                    .await
                    .map_err(|e| ServiceError::transport(url, e))?;
                Err(ServiceError::Validation { message })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), "session request failed");
                Err(ServiceError::from_status(status, body))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, session_id: &str) -> ServiceResult<()> {
        let url = self.urls.session(session_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ServiceError::transport(&url, e))?;

        let status = response.status();
        if status.is_success() {
            debug!("session deleted");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::from_status(status, body))
    }

    #[instrument(skip(self))]
    async fn list_container_images(&self, session_type: &str) -> ServiceResult<Vec<ContainerImage>> {
        let url = &self.urls.images;
        let response = self
            .client
            .get(url)
            .query(&[("type", session_type)])
            .send()
            .await
            .map_err(|e| ServiceError::transport(url, e))?;

        Self::read_json(url, response).await
    }

    #[instrument(skip(self))]
    async fn get_context_resources(&self) -> ServiceResult<ContextResources> {
        let url = &self.urls.context;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::transport(url, e))?;

        let context: ContextResources = Self::read_json(url, response).await?;
        context
            .validate()
            .map_err(|detail| ServiceError::malformed(StatusCode::OK, detail))?;
        Ok(context)
    }
}
