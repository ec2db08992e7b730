//! Instance creation, lookup and listing.
//!
//! Lookups scan the instances directories in precedence order; creation
//! always targets the first one. Creation is a sequence of exclusive steps
//! with no rollback: a failure part-way leaves a partial instance behind, and
//! creating the same name again reports `InstanceAlreadyExists`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument, trace, warn};

use super::migration::{self, MigrationOutcome};
use super::storage::write_new;
use super::{Instance, InstanceMetadata};
use crate::desktop::{DesktopEntries, run_best_effort};
use crate::dirs::{Directories, find_first, validate_name};
use crate::error::{Error, Result};
use crate::profile::{self, Profile};

/// Options for [`InstanceManager::create_instance`].
///
/// # Example
///
/// ```
/// use hutch::instance::CreateOptions;
///
/// let options = CreateOptions::new("web")
///     .with_profile("firefox")
///     .with_desktop_entry()
///     .with_import_tips();
/// assert_eq!(options.profile.as_deref(), Some("firefox"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Name of the new instance.
    pub name: String,
    /// Profile to seed the instance from.
    pub profile: Option<String>,
    /// Write a desktop entry for the instance.
    pub desktop_entry: bool,
    /// Print the profile's import tips.
    pub import_tips: bool,
}

impl CreateOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile: None,
            desktop_entry: false,
            import_tips: false,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn with_desktop_entry(mut self) -> Self {
        self.desktop_entry = true;
        self
    }

    #[must_use]
    pub fn with_import_tips(mut self) -> Self {
        self.import_tips = true;
        self
    }
}

/// Resolves profiles and manages instances across the search roots.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    dirs: Directories,
    desktop: Option<DesktopEntries>,
}

impl InstanceManager {
    /// Creates a manager whose desktop entries go to `dirs.applications_dir()`.
    #[must_use]
    pub fn new(dirs: Directories) -> Self {
        let desktop = dirs.applications_dir().map(DesktopEntries::new);
        Self { dirs, desktop }
    }

    /// Replaces the desktop entry writer.
    #[must_use]
    pub fn with_desktop_entries(mut self, desktop: DesktopEntries) -> Self {
        self.desktop = Some(desktop);
        self
    }

    /// Finds the highest-precedence profile called `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProfileNotFound` if no profile directory has it.
    pub fn lookup_profile(&self, name: &str) -> Result<Profile> {
        profile::lookup(&self.dirs, name)
    }

    /// Names of all available profiles.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a profile directory cannot be read.
    pub fn list_profile_names(&self) -> Result<BTreeSet<String>> {
        profile::list_names(&self.dirs)
    }

    /// Finds the highest-precedence instance called `name` without migrating it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstanceNotFound` if no instances directory has it.
    #[instrument(skip(self))]
    pub fn find_instance(&self, name: &str) -> Result<Instance> {
        validate_name(name)?;

        let root = find_first(self.dirs.instance_directories()?, name, Path::is_dir)
            .ok_or_else(|| Error::InstanceNotFound {
                name: name.to_string(),
            })?;

        trace!(root = %root.display(), "Found instance");
        Ok(Instance::new(name, root))
    }

    /// Finds the instance called `name`, migrating a legacy layout first.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstanceNotFound` if no instances directory has it, or
    /// a migration error.
    #[instrument(skip(self))]
    pub fn lookup_instance(&self, name: &str) -> Result<Instance> {
        let instance = self.find_instance(name)?;

        if migration::migrate(&instance.paths)? == MigrationOutcome::Migrated {
            info!(instance = %name, "Migrated legacy configuration");
        }

        Ok(instance)
    }

    /// Creates a new instance in the primary instances directory.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Error::InstanceAlreadyExists` if the name is taken
    /// - `Error::ProfileNotFound` if the requested profile does not exist
    /// - `Error::HomeDirectoryUnavailable` if a desktop entry is requested but
    ///   no applications directory is known
    /// - `Error::ConfigDocumentAlreadyExists` if a document was written concurrently
    /// - `Error::Io` if a filesystem operation fails
    #[instrument(skip(self, options), fields(name = %options.name, profile = ?options.profile))]
    pub fn create_instance(&self, options: &CreateOptions) -> Result<Instance> {
        validate_name(&options.name)?;

        let desktop = match (options.desktop_entry, &self.desktop) {
            (false, _) => None,
            (true, Some(desktop)) => Some(desktop),
            (true, None) => return Err(Error::HomeDirectoryUnavailable),
        };

        let root = self.dirs.primary_instance_directory()?.join(&options.name);
        let instance = Instance::new(&options.name, root);

        instance.paths.create_directories(&options.name)?;
        trace!("Created instance directories");

        let profile = match &options.profile {
            Some(name) => self.lookup_profile(name)?,
            None => Profile::default(),
        };

        let services = profile
            .services
            .to_toml_string()
            .map_err(|e| Error::config(&instance.paths.services_file, e))?;
        write_new(&instance.paths.services_file, services.as_bytes())?;
        trace!("Wrote services document");

        if let Some(desktop) = desktop {
            if profile.dot_desktop_path.is_empty() {
                desktop.write_placeholder(&instance.name)?;
            } else {
                desktop.write_for_profile(&instance.name, &profile)?;
                if let Some(command) = &profile.post_create_command {
                    run_best_effort(command);
                }
            }
            desktop.update_database();
        }

        InstanceMetadata::new(options.profile.clone()).save(&instance.paths.metadata_file)?;

        if options.import_tips
            && options.profile.is_some()
            && let Some(tips) = &profile.import_tips
        {
            eprintln!("Import tips: {tips}");
        }

        debug!(root = %instance.paths.root.display(), "Instance created");
        Ok(instance)
    }

    /// Every instance in every instances directory, in precedence order.
    ///
    /// Names present in several directories are listed once per directory.
    /// Entries whose names are not valid UTF-8 cannot be looked up and are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if an instances directory cannot be read.
    pub fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();

        for dir in self.dirs.instance_directories()? {
            let entries = fs::read_dir(&dir).map_err(|e| {
                Error::io(
                    format!("failed to read instances directory: {}", dir.display()),
                    e,
                )
            })?;

            let mut found = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| Error::io(format!("failed to read entry in: {}", dir.display()), e))?
                    .path();
                if !path.is_dir() {
                    continue;
                }
                match path.file_name().and_then(|name| name.to_str()) {
                    Some(name) => found.push(Instance::new(name, &path)),
                    None => warn!(path = %path.display(), "Skipping instance with a non-UTF-8 name"),
                }
            }

            found.sort_by(|a, b| a.name.cmp(&b.name));
            instances.extend(found);
        }

        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> InstanceManager {
        let dirs = Directories::new(
            vec![temp.path().join("config")],
            vec![temp.path().join("data")],
            temp.path().join("applications"),
        );
        InstanceManager::new(dirs)
    }

    #[test]
    fn test_create_options_defaults() {
        let options = CreateOptions::new("web");
        assert_eq!(options.profile, None);
        assert!(!options.desktop_entry);
        assert!(!options.import_tips);
    }

    #[test]
    fn test_create_without_profile() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let manager = manager(&temp);

        let instance = manager.create_instance(&CreateOptions::new("web")).unwrap();

        assert_eq!(instance.paths.root, temp.path().join("data/instances/web"));
        assert!(instance.paths.home.is_dir());
        assert!(instance.read_services().unwrap().is_empty());
        let meta = instance.metadata().unwrap().expect("metadata written");
        assert_eq!(meta.creation_profile_name, None);
    }

    #[test]
    fn test_create_with_missing_profile_leaves_partial_instance() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let manager = manager(&temp);

        let err = manager
            .create_instance(&CreateOptions::new("web").with_profile("nope"))
            .unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound { .. }));

        let partial = manager.find_instance("web").unwrap();
        assert!(!partial.is_complete());

        let err = manager.create_instance(&CreateOptions::new("web")).unwrap_err();
        assert!(matches!(err, Error::InstanceAlreadyExists { .. }));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let manager = manager(&temp);

        assert!(matches!(
            manager.create_instance(&CreateOptions::new("../escape")),
            Err(Error::InvalidName { .. })
        ));
        assert!(matches!(
            manager.lookup_instance(".."),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn test_list_instances_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().expect("failed to create temp dir");
        let manager = manager(&temp);
        let instances = temp.path().join("data/instances");
        fs::create_dir_all(instances.join("web")).unwrap();
        fs::create_dir_all(instances.join(OsStr::from_bytes(b"caf\xe9"))).unwrap();

        let listed = manager.list_instances().unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "web");
        for instance in &listed {
            assert!(manager.lookup_instance(&instance.name).is_ok());
        }
    }

    #[test]
    fn test_desktop_entry_requires_applications_dir() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let dirs = Directories::resolve(
            |key| match key {
                crate::dirs::CONFIG_DIRS_ENV => Some(temp.path().join("config").into_os_string()),
                crate::dirs::DATA_DIRS_ENV => Some(temp.path().join("data").into_os_string()),
                _ => None,
            },
            || Err(Error::HomeDirectoryUnavailable),
        )
        .unwrap();
        let manager = InstanceManager::new(dirs);

        let err = manager
            .create_instance(&CreateOptions::new("web").with_desktop_entry())
            .unwrap_err();
        assert!(matches!(err, Error::HomeDirectoryUnavailable));
        assert!(matches!(
            manager.find_instance("web"),
            Err(Error::InstanceNotFound { .. })
        ));

        manager.create_instance(&CreateOptions::new("web")).unwrap();
    }

    #[test]
    fn test_create_placeholder_desktop_entry() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let manager = manager(&temp);

        manager
            .create_instance(&CreateOptions::new("web").with_desktop_entry())
            .unwrap();

        assert!(temp.path().join("applications/hutch_web.desktop").is_file());
    }
}
