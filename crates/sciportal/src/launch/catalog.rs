//! Session type catalog.
//!
//! A static JSON document naming the launchable session types, the default
//! type, and which launch-form fields each type uses.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog shipped with the crate.
const BUILTIN_CATALOG: &str = include_str!("../../assets/sessiontype_map_en.json");

/// Errors loading the type catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read type catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse type catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid type catalog: {0}")]
    Invalid(String),
}

/// A launch-form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormField {
    Name,
    Type,
    Image,
    Memory,
    Cores,
    /// Field names this crate does not render; ignored.
    #[serde(other)]
    Unknown,
}

/// Every field the launch form can show.
pub const LAUNCH_FORM_FIELDS: [FormField; 5] = [
    FormField::Name,
    FormField::Type,
    FormField::Image,
    FormField::Memory,
    FormField::Cores,
];

/// One launchable session type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTypeEntry {
    pub name: String,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
}

/// Which launch-form fields apply to a session type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldVisibility {
    pub visible: Vec<FormField>,
    pub hidden: Vec<FormField>,
}

impl FieldVisibility {
    pub fn shows(&self, field: FormField) -> bool {
        self.visible.contains(&field)
    }
}

/// Session types available to the launch form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTypeCatalog {
    pub default: String,
    pub session_types: Vec<SessionTypeEntry>,
}

impl SessionTypeCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::parse(BUILTIN_CATALOG)
    }

    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&json)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.session_types.is_empty() {
            return Err(CatalogError::Invalid("no session types".to_string()));
        }
        if self.entry(&self.default).is_none() {
            return Err(CatalogError::Invalid(format!(
                "default type {} is not a listed session type",
                self.default
            )));
        }
        Ok(())
    }

    pub fn entry(&self, session_type: &str) -> Option<&SessionTypeEntry> {
        self.session_types.iter().find(|t| t.name == session_type)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.session_types.iter().map(|t| t.name.as_str())
    }

    /// Split the full field set into the fields `session_type` uses and the
    /// rest. Unknown types show nothing.
    pub fn field_visibility(&self, session_type: &str) -> FieldVisibility {
        let used = self
            .entry(session_type)
            .map(|t| t.form_fields.as_slice())
            .unwrap_or_default();

        let mut visibility = FieldVisibility::default();
        for field in LAUNCH_FORM_FIELDS {
            if used.contains(&field) {
                visibility.visible.push(field);
            } else {
                visibility.hidden.push(field);
            }
        }
        visibility
    }
}
