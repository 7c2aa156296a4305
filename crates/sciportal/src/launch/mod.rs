//! Session launch form.
//!
//! Loads the session type catalog, computes per-type defaults from the
//! image and context endpoints, and submits new session requests through
//! the coordinator.

mod catalog;
mod form;

pub use catalog::{
    CatalogError, FieldVisibility, FormField, LAUNCH_FORM_FIELDS, SessionTypeCatalog,
    SessionTypeEntry,
};
pub use form::{CatalogSource, LaunchDefaults, LaunchError, LaunchForm, LaunchOverrides};
