//! JSON device and entity descriptions with placeholder markers.
//!
//! # Design
//! Substitution is literal text replacement performed before the JSON is
//! parsed, so a substituted value lands inside whatever JSON string the
//! marker sits in. Values must therefore be JSON-safe: a quote or backslash
//! in an id breaks the document, and rendering reports it as
//! `ApiError::Template`.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::ApiError;

/// The markers a template may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    DeviceId,
    EntityId,
    DeviceIp,
    Port,
    EntityType,
}

impl Placeholder {
    pub fn marker(&self) -> &'static str {
        match self {
            Placeholder::DeviceId => "[DEVICE_ID]",
            Placeholder::EntityId => "[ENTITY_ID]",
            Placeholder::DeviceIp => "[DEVICE_IP]",
            Placeholder::Port => "[PORT]",
            Placeholder::EntityType => "[ENTITY_TYPE]",
        }
    }
}

/// JSON text with placeholder markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(String);

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Read a template file. The file must already be valid JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "reading template");
        let text = fs::read_to_string(path).map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_json::from_str(&text).map_err(ApiError::Template)?;
        Ok(Self(document.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the template declares a JSON key named `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.0.contains(&format!("\"{key}\""))
    }

    /// Replace every occurrence of each marker with its value.
    pub fn fill(&self, values: &[(Placeholder, &str)]) -> String {
        values
            .iter()
            .fold(self.0.clone(), |text, (placeholder, value)| {
                text.replace(placeholder.marker(), value)
            })
    }

    /// `fill`, then parse the result as JSON.
    pub fn render(&self, values: &[(Placeholder, &str)]) -> Result<Value, ApiError> {
        serde_json::from_str(&self.fill(values)).map_err(ApiError::Template)
    }
}
