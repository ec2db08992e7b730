//! Filesystem layout and document I/O for instances.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use toml::Table;

use crate::error::{Error, Result};

/// Directory permissions: owner read/write/execute only (0700).
pub(crate) const DIR_PERMISSIONS: u32 = 0o700;

/// Current per-service configuration document.
pub const SERVICES_FILE_NAME: &str = "services.toml";

/// Monolithic document of the legacy layout.
pub const LEGACY_CONFIG_FILE_NAME: &str = "config.toml";

/// Creation metadata.
pub const METADATA_FILE_NAME: &str = "metadata_v1.toml";

/// Paths of an instance directory.
///
/// ```text
/// {instances_dir}/{name}/
/// ├── home/              # bound to /home/user in the sandbox
/// ├── services.toml      # per-service configuration
/// ├── metadata_v1.toml   # creation metadata
/// └── config.toml        # legacy document, left in place after migration
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub root: PathBuf,
    pub home: PathBuf,
    pub services_file: PathBuf,
    pub legacy_config_file: PathBuf,
    pub metadata_file: PathBuf,
}

impl InstancePaths {
    /// Computes the paths of `root`. Nothing is created.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            home: root.join("home"),
            services_file: root.join(SERVICES_FILE_NAME),
            legacy_config_file: root.join(LEGACY_CONFIG_FILE_NAME),
            metadata_file: root.join(METADATA_FILE_NAME),
            root,
        }
    }

    /// Exclusively creates the instance root and its home directory (0700).
    ///
    /// # Errors
    ///
    /// Returns `Error::InstanceAlreadyExists` if the root already exists.
    pub fn create_directories(&self, name: &str) -> Result<()> {
        let mut builder = DirBuilder::new();
        builder.mode(DIR_PERMISSIONS);

        builder.create(&self.root).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::InstanceAlreadyExists {
                    name: name.to_string(),
                    path: self.root.clone(),
                }
            } else {
                Error::io(
                    format!("failed to create directory: {}", self.root.display()),
                    e,
                )
            }
        })?;

        builder.create(&self.home).map_err(|e| {
            Error::io(
                format!("failed to create directory: {}", self.home.display()),
                e,
            )
        })
    }
}

/// Reads and parses a TOML document.
///
/// # Errors
///
/// Returns `Error::Io` if reading fails, `Error::Configuration` if parsing fails.
pub fn read_toml(path: &Path) -> Result<Table> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read: {}", path.display()), e))?;
    content
        .parse::<Table>()
        .map_err(|e| Error::config(path, e.message()))
}

/// Writes `content` to a file that must not exist yet.
///
/// # Errors
///
/// Returns `Error::ConfigDocumentAlreadyExists` if the file exists.
pub fn write_new(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::ConfigDocumentAlreadyExists {
                    path: path.to_path_buf(),
                }
            } else {
                Error::io(format!("failed to create: {}", path.display()), e)
            }
        })?;

    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::io(format!("failed to write: {}", path.display()), e))
}

/// Replaces `path` atomically.
///
/// Writes to a temporary file first, then renames to the target path
/// so readers never see a partially written document.
///
/// # Errors
///
/// Returns `Error::Io` if writing fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("toml.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| {
        Error::io(
            format!("failed to create temp file: {}", temp_path.display()),
            e,
        )
    })?;

    file.write_all(content)
        .map_err(|e| Error::io(format!("failed to write: {}", temp_path.display()), e))?;

    file.sync_all()
        .map_err(|e| Error::io("failed to sync temp file", e))?;

    fs::rename(&temp_path, path).map_err(|e| {
        Error::io(
            format!(
                "failed to rename temp file {} to {}",
                temp_path.display(),
                path.display()
            ),
            e,
        )
    })
}
