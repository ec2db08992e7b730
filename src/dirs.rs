//! Configuration and data roots.
//!
//! Profiles live under configuration roots and instances under data roots.
//! Both are ordered: for a named lookup the first root that has the entry wins,
//! and roots are never merged for a single name.
//!
//! ```text
//! <config root>/profiles/<name>.toml
//! <data root>/instances/<name>/
//! ```
//!
//! The roots come from `HUTCH_CONFDIRS` / `HUTCH_DATADIRS` (colon-separated, used
//! verbatim) or, when unset, from fixed fallbacks:
//!
//! | | fallback |
//! |---|---|
//! | config | `$XDG_CONFIG_HOME/hutch`, `/etc/hutch`, `/usr/share/hutch` |
//! | data | `$XDG_DATA_HOME/hutch` |

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use etcetera::BaseStrategy;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Colon-separated override for the configuration roots.
pub const CONFIG_DIRS_ENV: &str = "HUTCH_CONFDIRS";

/// Colon-separated override for the data roots.
pub const DATA_DIRS_ENV: &str = "HUTCH_DATADIRS";

const APP_DIR_NAME: &str = "hutch";
const SYSTEM_CONFIG_DIR: &str = "/etc/hutch";
const PACKAGE_CONFIG_DIR: &str = "/usr/share/hutch";

const PROFILES_DIR_NAME: &str = "profiles";
const INSTANCES_DIR_NAME: &str = "instances";

/// Roots used when the override variables are not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallback {
    pub user_config: PathBuf,
    pub system_config: PathBuf,
    pub package_config: PathBuf,
    pub user_data: PathBuf,
    /// Per-user desktop entries directory.
    pub applications: PathBuf,
}

impl Fallback {
    /// Fallbacks derived from the XDG base directories of the current user.
    ///
    /// # Errors
    ///
    /// Returns `Error::HomeDirectoryUnavailable` if the home directory cannot be resolved.
    pub fn xdg() -> Result<Self> {
        let strategy = etcetera::base_strategy::choose_base_strategy()
            .map_err(|_| Error::HomeDirectoryUnavailable)?;
        let data_home = strategy.data_dir();

        Ok(Self {
            user_config: strategy.config_dir().join(APP_DIR_NAME),
            system_config: PathBuf::from(SYSTEM_CONFIG_DIR),
            package_config: PathBuf::from(PACKAGE_CONFIG_DIR),
            user_data: data_home.join(APP_DIR_NAME),
            applications: data_home.join("applications"),
        })
    }
}

/// Resolved, read-only search roots for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    config_roots: Vec<PathBuf>,
    data_roots: Vec<PathBuf>,
    applications_dir: Option<PathBuf>,
}

impl Directories {
    /// Uses the given roots as-is.
    #[must_use]
    pub fn new(
        config_roots: Vec<PathBuf>,
        data_roots: Vec<PathBuf>,
        applications_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_roots,
            data_roots,
            applications_dir: Some(applications_dir.into()),
        }
    }

    /// Resolves the roots from the process environment.
    ///
    /// Call once at startup and pass the result around.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is unset and the XDG directories cannot
    /// be resolved, or if a user fallback root cannot be created.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var_os(key), Fallback::xdg)
    }

    /// Resolves the roots from `lookup` (an environment accessor) and `fallback`.
    ///
    /// An override that is set always wins, with no fallback appended. User
    /// fallback roots are created on demand. When both overrides are set, a
    /// failing `fallback` only leaves the applications directory unknown.
    ///
    /// # Errors
    ///
    /// Returns the `fallback` error if an override is unset, or `Error::Io` if
    /// a user fallback root cannot be created.
    pub fn resolve<F, G>(lookup: F, fallback: G) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
        G: FnOnce() -> Result<Fallback>,
    {
        let config_override = lookup(CONFIG_DIRS_ENV);
        let data_override = lookup(DATA_DIRS_ENV);

        let fallback = match fallback() {
            Ok(fallback) => Some(fallback),
            Err(e) if config_override.is_some() && data_override.is_some() => {
                debug!(error = %e, "No fallback directories, using overrides only");
                None
            }
            Err(e) => return Err(e),
        };

        let config_roots = match (config_override, &fallback) {
            (Some(value), _) => split_roots(&value),
            (None, Some(fallback)) => {
                ensure_dir(&fallback.user_config)?;
                vec![
                    fallback.user_config.clone(),
                    fallback.system_config.clone(),
                    fallback.package_config.clone(),
                ]
            }
            (None, None) => return Err(Error::HomeDirectoryUnavailable),
        };

        let data_roots = match (data_override, &fallback) {
            (Some(value), _) => split_roots(&value),
            (None, Some(fallback)) => {
                ensure_dir(&fallback.user_data)?;
                vec![fallback.user_data.clone()]
            }
            (None, None) => return Err(Error::HomeDirectoryUnavailable),
        };

        debug!(?config_roots, ?data_roots, "Resolved search roots");
        Ok(Self {
            config_roots,
            data_roots,
            applications_dir: fallback.map(|fallback| fallback.applications),
        })
    }

    /// Configuration roots, highest precedence first.
    #[must_use]
    pub fn config_roots(&self) -> &[PathBuf] {
        &self.config_roots
    }

    /// Data roots, highest precedence first.
    #[must_use]
    pub fn data_roots(&self) -> &[PathBuf] {
        &self.data_roots
    }

    /// Directory that receives generated desktop entries.
    ///
    /// `None` when only overrides were available and the user's XDG data
    /// directory could not be resolved.
    #[must_use]
    pub fn applications_dir(&self) -> Option<&Path> {
        self.applications_dir.as_deref()
    }

    /// `profiles` directory of every configuration root.
    ///
    /// The directories are not created; a missing one simply has no profiles.
    #[must_use]
    pub fn profile_directories(&self) -> Vec<PathBuf> {
        self.config_roots
            .iter()
            .map(|root| root.join(PROFILES_DIR_NAME))
            .collect()
    }

    /// `instances` directory of every data root, created if missing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a directory cannot be created.
    pub fn instance_directories(&self) -> Result<Vec<PathBuf>> {
        self.data_roots
            .iter()
            .map(|root| {
                let dir = root.join(INSTANCES_DIR_NAME);
                ensure_dir(&dir)?;
                Ok(dir)
            })
            .collect()
    }

    /// The instances directory new instances are created in.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no data root is configured.
    pub fn primary_instance_directory(&self) -> Result<PathBuf> {
        self.instance_directories()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::config(DATA_DIRS_ENV, "no data directories configured"))
    }
}

/// Returns `<dir>/<entry>` for the first `dir` where `predicate` holds.
///
/// Shared by profile and instance lookup.
pub fn find_first<I, P>(dirs: I, entry: &str, predicate: P) -> Option<PathBuf>
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
    P: Fn(&Path) -> bool,
{
    dirs.into_iter().find_map(|dir| {
        let candidate = dir.as_ref().join(entry);
        trace!(candidate = %candidate.display(), "Probing");
        predicate(&candidate).then_some(candidate)
    })
}

/// Checks that `name` is usable as a single directory entry.
///
/// # Errors
///
/// Returns `Error::InvalidName` for empty names, `.`/`..`, or names with a separator.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(invalid("name must not contain '/' or NUL"));
    }
    match Path::new(name).components().next() {
        Some(Component::Normal(_)) => Ok(()),
        _ => Err(invalid("name must not be '.' or '..'")),
    }
}

fn split_roots(value: &OsString) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .filter(|path| !path.as_os_str().is_empty())
        .collect()
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("failed to create directory: {}", dir.display()), e))
}
