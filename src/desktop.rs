//! Desktop entries for instances.
//!
//! Entries are written to the user's applications directory as
//! `hutch_<instance>.desktop`. When a profile names a template, the template's
//! `Exec=` lines are rewritten to launch through `hutch run <instance> --` and
//! the main `Name=` gets the instance appended; otherwise a placeholder entry
//! that just runs the instance is written.
//!
//! Updating the desktop database and running profile hooks are best-effort:
//! a missing or failing command only logs a warning.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::instance::storage::write_new;
use crate::profile::Profile;

/// System directory searched for bare template names.
pub const SYSTEM_APPLICATIONS_DIR: &str = "/usr/share/applications";

const LAUNCHER: &str = "hutch";
const DESKTOP_EXTENSION: &str = ".desktop";
const MAIN_GROUP: &str = "[Desktop Entry]";

/// Writes desktop entries into one applications directory.
#[derive(Debug, Clone)]
pub struct DesktopEntries {
    applications_dir: PathBuf,
    template_dirs: Vec<PathBuf>,
}

impl DesktopEntries {
    #[must_use]
    pub fn new(applications_dir: impl Into<PathBuf>) -> Self {
        Self {
            applications_dir: applications_dir.into(),
            template_dirs: vec![PathBuf::from(SYSTEM_APPLICATIONS_DIR)],
        }
    }

    /// Replaces the directories searched for bare template names.
    #[must_use]
    pub fn with_template_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.template_dirs = dirs;
        self
    }

    /// Path of the entry generated for `instance`.
    #[must_use]
    pub fn entry_path(&self, instance: &str) -> PathBuf {
        self.applications_dir
            .join(format!("{LAUNCHER}_{instance}{DESKTOP_EXTENSION}"))
    }

    /// Resolves a template name to an existing file.
    ///
    /// Names containing `/` are paths; bare names are looked up in the template
    /// directories, with `.desktop` appended if missing.
    #[must_use]
    pub fn resolve_template(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            let path = PathBuf::from(name);
            return path.is_file().then_some(path);
        }

        let file_name = if name.ends_with(DESKTOP_EXTENSION) {
            name.to_string()
        } else {
            format!("{name}{DESKTOP_EXTENSION}")
        };
        crate::dirs::find_first(&self.template_dirs, &file_name, Path::is_file)
    }

    /// Writes the entry for an instance created from `profile`.
    ///
    /// Falls back to a placeholder if none of the profile's templates exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigDocumentAlreadyExists` if the entry exists, or
    /// `Error::Io` if reading the template or writing the entry fails.
    #[instrument(skip(self, profile), fields(profile = %profile.name))]
    pub fn write_for_profile(&self, instance: &str, profile: &Profile) -> Result<PathBuf> {
        let Some(template) = profile
            .dot_desktop_path
            .iter()
            .find_map(|name| self.resolve_template(name))
        else {
            warn!(
                templates = ?profile.dot_desktop_path,
                "No desktop entry template found, writing a placeholder"
            );
            return self.write_placeholder(instance);
        };

        debug!(template = %template.display(), "Rewriting desktop entry template");
        let content = fs::read_to_string(&template).map_err(|e| {
            Error::io(
                format!("failed to read desktop entry: {}", template.display()),
                e,
            )
        })?;

        self.write_entry(instance, &rewrite_entry(&content, instance))
    }

    /// Writes a minimal entry that launches the instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigDocumentAlreadyExists` if the entry exists, or
    /// `Error::Io` if writing fails.
    pub fn write_placeholder(&self, instance: &str) -> Result<PathBuf> {
        self.write_entry(instance, &placeholder_entry(instance))
    }

    fn write_entry(&self, instance: &str, content: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.applications_dir).map_err(|e| {
            Error::io(
                format!(
                    "failed to create directory: {}",
                    self.applications_dir.display()
                ),
                e,
            )
        })?;

        let path = self.entry_path(instance);
        write_new(&path, content.as_bytes())?;
        debug!(path = %path.display(), "Wrote desktop entry");
        Ok(path)
    }

    /// Runs `update-desktop-database` on the applications directory.
    pub fn update_database(&self) {
        let command = [
            "update-desktop-database".to_string(),
            self.applications_dir.to_string_lossy().into_owned(),
        ];
        run_best_effort(&command);
    }
}

/// Runs an external command, logging instead of failing.
///
/// Returns whether the command ran and exited successfully.
pub fn run_best_effort(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => {
            debug!(%program, "Command succeeded");
            true
        }
        Ok(status) => {
            warn!(%program, %status, "Command failed");
            false
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(%program, "Command not found, skipping");
            false
        }
        Err(e) => {
            warn!(%program, error = %e, "Could not run command");
            false
        }
    }
}

/// Rewrites a desktop entry so every action launches inside `instance`.
#[must_use]
pub fn rewrite_entry(template: &str, instance: &str) -> String {
    let prefix = format!("{LAUNCHER} run {} --", quote_exec_arg(instance));
    let mut in_main_group = false;
    let mut output = String::with_capacity(template.len() + 64);

    for line in template.lines() {
        let trimmed = line.trim_start();

        if trimmed.starts_with('[') {
            in_main_group = trimmed.trim_end() == MAIN_GROUP;
            output.push_str(line);
        } else if let Some(exec) = trimmed.strip_prefix("Exec=") {
            output.push_str(&format!("Exec={prefix} {exec}"));
        } else if trimmed.starts_with("DBusActivatable=") {
            // D-Bus activation would start the application outside the sandbox.
            continue;
        } else if in_main_group && let Some(name) = trimmed.strip_prefix("Name=") {
            output.push_str(&format!("Name={name} ({LAUNCHER}: {instance})"));
        } else {
            output.push_str(line);
        }
        output.push('\n');
    }

    output
}

/// Minimal entry for an instance without a template.
#[must_use]
pub fn placeholder_entry(instance: &str) -> String {
    format!(
        "{MAIN_GROUP}\nType=Application\nName={instance} ({LAUNCHER})\n\
         Exec={LAUNCHER} run {}\nCategories=Utility;\n",
        quote_exec_arg(instance)
    )
}

/// Quotes an `Exec=` argument per the desktop entry specification.
fn quote_exec_arg(arg: &str) -> String {
    const RESERVED: &[char] = &[
        ' ', '\t', '\n', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(',
        ')', '`',
    ];

    if !arg.contains(RESERVED) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
