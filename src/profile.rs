//! Profiles: reusable templates for new instances.
//!
//! A profile is a TOML document `<config root>/profiles/<name>.toml`:
//!
//! ```toml
//! description = "Firefox web browser"
//! import_tips = "Copy ~/.mozilla into the instance home to keep your profile."
//! dot_desktop_path = ["firefox"]
//!
//! [services.common]
//! executable_name = "firefox"
//!
//! [services.network]
//! ```
//!
//! Lookups scan the profile directories in precedence order and stop at the
//! first match.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::dirs::{Directories, find_first, validate_name};
use crate::error::{Error, Result};
use crate::sandbox::ServicesConfig;

const PROFILE_EXTENSION: &str = "toml";

/// A read-only profile document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Name the profile was looked up by. Empty for the default profile.
    #[serde(skip)]
    pub name: String,

    /// Human-readable description.
    pub description: Option<String>,

    /// Guidance shown after creating an instance from this profile.
    pub import_tips: Option<String>,

    /// Desktop entry templates: bare names or paths.
    #[serde(default)]
    pub dot_desktop_path: Vec<String>,

    /// Command run after a desktop entry is written for a new instance.
    pub post_create_command: Option<Vec<String>>,

    /// Per-service configuration copied into new instances.
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Profile {
    /// Loads the profile document at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails, or `Error::Configuration` if the
    /// document is malformed.
    pub fn load(path: &Path, name: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read profile: {}", path.display()), e))?;
        let mut profile: Profile =
            toml::from_str(&content).map_err(|e| Error::config(path, e.message()))?;
        profile.name = name.to_string();
        Ok(profile)
    }
}

/// Finds and loads the highest-precedence profile called `name`.
///
/// # Errors
///
/// Returns `Error::ProfileNotFound` if no profile directory has it.
#[instrument(skip(dirs))]
pub fn lookup(dirs: &Directories, name: &str) -> Result<Profile> {
    validate_name(name)?;

    let file_name = format!("{name}.{PROFILE_EXTENSION}");
    let path = find_first(dirs.profile_directories(), &file_name, Path::is_file).ok_or_else(
        || Error::ProfileNotFound {
            name: name.to_string(),
        },
    )?;

    debug!(path = %path.display(), "Found profile");
    Profile::load(&path, name)
}

/// Names of all profiles across every profile directory.
///
/// Missing profile directories are skipped.
///
/// # Errors
///
/// Returns `Error::Io` if an existing directory cannot be read.
pub fn list_names(dirs: &Directories) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    for dir in dirs.profile_directories() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(dir = %dir.display(), "No profile directory");
                continue;
            }
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read profile directory: {}", dir.display()),
                    e,
                ));
            }
        };

        for entry in entries {
            let path = entry
                .map_err(|e| Error::io(format!("failed to read entry in: {}", dir.display()), e))?
                .path();
            if path.extension().is_some_and(|ext| ext == PROFILE_EXTENSION)
                && let Some(stem) = path.file_stem()
            {
                names.insert(stem.to_string_lossy().into_owned());
            }
        }
    }

    Ok(names)
}
