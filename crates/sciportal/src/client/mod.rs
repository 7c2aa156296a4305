//! Session service client module.
//!
//! Provides an async client for the session web service: listing,
//! creating and deleting sessions, and reading the image and context
//! catalogs used by the launch form.

mod client;
mod error;
mod types;

pub use client::{PortalClient, SessionApi};
pub use error::{ServiceError, ServiceErrorKind, ServiceResult};
pub use types::{ContainerImage, ContextResources, Credentials, ServiceUrls};
