//! Persistent sandbox instances.
//!
//! An instance is a named directory under one of the instances directories.
//! It owns a home directory that is bound to `/home/user` inside the sandbox
//! and a per-service configuration document that decides what else the
//! sandbox gets.
//!
//! # Example
//!
//! ```no_run
//! use hutch::dirs::Directories;
//! use hutch::instance::{CreateOptions, InstanceManager};
//!
//! let manager = InstanceManager::new(Directories::from_env()?);
//!
//! let created = manager.create_instance(&CreateOptions::new("web").with_profile("firefox"))?;
//! let found = manager.lookup_instance("web")?;
//! assert_eq!(created.paths, found.paths);
//! # Ok::<(), hutch::Error>(())
//! ```

mod lifecycle;
mod meta;
pub mod migration;
pub mod storage;

pub use lifecycle::{CreateOptions, InstanceManager};
pub use meta::InstanceMetadata;
pub use migration::MigrationOutcome;
pub use storage::InstancePaths;

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::sandbox::ServicesConfig;

/// A persistent, uniquely named sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Directory name of the instance.
    pub name: String,
    /// Filesystem paths for this instance.
    pub paths: InstancePaths,
}

impl Instance {
    /// Binds `name` to the instance directory `root`. Nothing is read.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths: InstancePaths::new(root),
        }
    }

    /// Whether the per-service configuration document exists.
    ///
    /// An instance without it was only partially created.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.paths.services_file.is_file()
    }

    /// Reads the per-service configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the document is missing or malformed.
    pub fn read_services(&self) -> Result<ServicesConfig> {
        if !self.is_complete() {
            return Err(Error::config(
                &self.paths.services_file,
                "instance has no services document; its creation may have been interrupted",
            ));
        }
        storage::read_toml(&self.paths.services_file).map(ServicesConfig::from_table)
    }

    /// Replaces the per-service configuration atomically.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if writing fails.
    pub fn save_services(&self, services: &ServicesConfig) -> Result<()> {
        let text = services
            .to_toml_string()
            .map_err(|e| Error::config(&self.paths.services_file, e))?;
        storage::write_atomic(&self.paths.services_file, text.as_bytes())
    }

    /// Creation metadata, if the instance has any.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata file exists but cannot be read.
    pub fn metadata(&self) -> Result<Option<InstanceMetadata>> {
        if !self.paths.metadata_file.is_file() {
            return Ok(None);
        }
        InstanceMetadata::load(&self.paths.metadata_file).map(Some)
    }
}
