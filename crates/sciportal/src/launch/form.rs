//! Launch form state.
//!
//! Holds the defaults shown for the selected session type and turns the
//! user's choices into a [`SessionForm`] for the coordinator.

use std::path::PathBuf;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::catalog::{CatalogError, FieldVisibility, FormField, SessionTypeCatalog};
use crate::client::{ContainerImage, ContextResources, ServiceError};
use crate::session::{SessionCoordinator, SessionForm, SessionRequest};

/// Errors surfaced by the launch form.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Unknown session type: {0}")]
    UnknownType(String),

    #[error("No container images available for session type {0}")]
    NoImages(String),

    #[error("Launch form is not open")]
    NotOpen,

    #[error("Launch form was closed before the request finished")]
    Cancelled,
}

/// Where the type catalog comes from.
#[derive(Debug, Clone, Default)]
pub enum CatalogSource {
    #[default]
    Builtin,
    File(PathBuf),
}

/// Values the form shows for the selected session type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchDefaults {
    pub session_type: String,
    pub name: String,
    pub image: String,
    pub cores: u32,
    pub ram: u32,
    pub fields: FieldVisibility,
    pub images: Vec<ContainerImage>,
    pub context: ContextResources,
}

/// User edits applied on top of [`LaunchDefaults`] at submit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOverrides {
    pub name: Option<String>,
    pub image: Option<String>,
    pub cores: Option<u32>,
    pub ram: Option<u32>,
}

impl LaunchDefaults {
    /// Build the request form. Fields hidden for the type are left out.
    pub fn to_form(&self, overrides: &LaunchOverrides) -> SessionForm {
        let name = overrides.name.clone().unwrap_or_else(|| self.name.clone());
        let mut form = SessionForm::new(name, self.session_type.clone());
        if self.fields.shows(FormField::Image) {
            form = form.image(overrides.image.clone().unwrap_or_else(|| self.image.clone()));
        }
        if self.fields.shows(FormField::Cores) {
            form = form.cores(overrides.cores.unwrap_or(self.cores));
        }
        if self.fields.shows(FormField::Memory) {
            form = form.ram(overrides.ram.unwrap_or(self.ram));
        }
        form
    }
}

/// The launch form bound to a coordinator.
#[derive(Debug)]
pub struct LaunchForm {
    coordinator: SessionCoordinator,
    source: CatalogSource,
    catalog: Option<SessionTypeCatalog>,
    current: Option<LaunchDefaults>,
    token: CancellationToken,
}

impl LaunchForm {
    pub fn new(coordinator: SessionCoordinator, source: CatalogSource) -> Self {
        Self {
            coordinator,
            source,
            catalog: None,
            current: None,
            token: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> Option<&SessionTypeCatalog> {
        self.catalog.as_ref()
    }

    pub fn current(&self) -> Option<&LaunchDefaults> {
        self.current.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Show the form with defaults for the catalog's default type.
    ///
    /// The catalog is loaded on first open and cached afterwards.
    pub async fn open(&mut self) -> Result<LaunchDefaults, LaunchError> {
        if self.token.is_cancelled() {
            self.token = CancellationToken::new();
        }
        let default_type = self.load_catalog().await?.default.clone();
        self.select_type(&default_type).await
    }

    /// Drop the cached catalog and read it again.
    pub async fn reload_catalog(&mut self) -> Result<&SessionTypeCatalog, LaunchError> {
        self.catalog = None;
        self.load_catalog().await
    }

    async fn load_catalog(&mut self) -> Result<&SessionTypeCatalog, LaunchError> {
        let catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => {
                let catalog = match &self.source {
                    CatalogSource::Builtin => SessionTypeCatalog::builtin()?,
                    CatalogSource::File(path) => SessionTypeCatalog::load(path).await?,
                };
                debug!(
                    "Loaded session type catalog with {} type(s)",
                    catalog.session_types.len()
                );
                catalog
            }
        };
        Ok(self.catalog.insert(catalog))
    }

    /// Switch to `session_type`, fetching its images and the context
    /// resources concurrently.
    pub async fn select_type(&mut self, session_type: &str) -> Result<LaunchDefaults, LaunchError> {
        let fields = {
            let catalog = self.load_catalog().await?;
            if catalog.entry(session_type).is_none() {
                return Err(LaunchError::UnknownType(session_type.to_string()));
            }
            catalog.field_visibility(session_type)
        };

        let api = self.coordinator.api();
        let fetch = futures::future::try_join(
            api.list_container_images(session_type),
            api.get_context_resources(),
        );
        let (images, context) = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(LaunchError::Cancelled),
            result = fetch => result?,
        };

        let image = images
            .first()
            .map(|image| image.id.clone())
            .ok_or_else(|| LaunchError::NoImages(session_type.to_string()))?;

        let defaults = LaunchDefaults {
            session_type: session_type.to_string(),
            name: self.coordinator.default_name_for(session_type),
            image,
            cores: context.default_cores,
            ram: context.default_ram,
            fields,
            images,
            context,
        };
        debug!(
            "Launch defaults for {}: {} image(s), {} core(s), {}G",
            session_type,
            defaults.images.len(),
            defaults.cores,
            defaults.ram
        );
        self.current = Some(defaults.clone());
        Ok(defaults)
    }

    /// Restore the defaults of the default type.
    pub async fn reset(&mut self) -> Result<LaunchDefaults, LaunchError> {
        if !self.is_open() {
            return Err(LaunchError::NotOpen);
        }
        self.open().await
    }

    /// Submit the form. On success the form is hidden; the coordinator
    /// publishes the request and reloads the list.
    pub async fn submit(&mut self, overrides: &LaunchOverrides) -> Result<SessionRequest, LaunchError> {
        let form = self
            .current
            .as_ref()
            .ok_or(LaunchError::NotOpen)?
            .to_form(overrides);

        let request = self.coordinator.create_session(&form).await?;
        info!("Launched {} ({})", request.name, request.session_type);
        self.current = None;
        Ok(request)
    }

    /// Hide the form. Pending fetches and any polling run are cancelled.
    pub fn close(&mut self) {
        self.token.cancel();
        self.current = None;
        if self.coordinator.cancel_polling() {
            debug!("Launch form closed, polling cancelled");
        }
    }

    /// Token cancelled when the form closes. Cancelling it from another task
    /// aborts an in-flight [`LaunchForm::select_type`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
