//! Instance creation metadata.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::storage::{read_toml, write_atomic};
use crate::error::{Error, Result};

/// Metadata persisted next to an instance's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Profile the instance was created from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_profile_name: Option<String>,

    /// When the instance was created.
    pub created_at: DateTime<Utc>,
}

impl InstanceMetadata {
    #[must_use]
    pub fn new(creation_profile_name: Option<String>) -> Self {
        Self {
            creation_profile_name,
            created_at: Utc::now(),
        }
    }

    /// Loads metadata from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails, or `Error::Configuration` if the
    /// document is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        toml::Value::Table(read_toml(path)?)
            .try_into()
            .map_err(|e: toml::de::Error| Error::config(path, e.message()))
    }

    /// Saves metadata atomically.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if writing fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string(self).map_err(|e| Error::config(path, e))?;
        write_atomic(path, text.as_bytes())
    }
}
