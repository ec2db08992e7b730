//! Migration of the legacy monolithic instance document.
//!
//! Old instances kept everything in `config.toml`:
//!
//! ```toml
//! services = ["network"]
//! executable_name = "firefox"
//!
//! [service.home_share]
//! home_paths = ["Downloads"]
//! ```
//!
//! The current layout stores one table per service in `services.toml`, with
//! the remaining top-level keys under `common`. Migration runs lazily on
//! lookup, is gated on `services.toml` being absent, and never deletes the
//! legacy document.

use toml::{Table, Value};
use tracing::{debug, info, instrument, warn};

use super::storage::{InstancePaths, read_toml, write_new};
use crate::error::{Error, Result};

const LEGACY_SERVICES_KEY: &str = "services";
const LEGACY_SERVICE_KEY: &str = "service";
const COMMON_SECTION: &str = "common";

/// What [`migrate`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// `services.toml` already exists.
    Current,
    /// `services.toml` was written from the legacy document.
    Migrated,
    /// Neither document exists, e.g. after an interrupted creation.
    Incomplete,
}

/// Converts a legacy document into the per-service layout.
///
/// Every name in `services` becomes an empty table, `service.<name>` tables
/// replace those, and all other keys move under `common`.
///
/// # Errors
///
/// Returns a description of the problem if `services` is not a list of
/// strings or `service` is not a table of tables.
pub fn convert_legacy(mut legacy: Table) -> std::result::Result<Table, String> {
    let mut converted = Table::new();

    if let Some(services) = legacy.remove(LEGACY_SERVICES_KEY) {
        let names = match services {
            Value::Array(names) => names,
            other => {
                return Err(format!(
                    "`{LEGACY_SERVICES_KEY}` must be a list, found {}",
                    other.type_str()
                ));
            }
        };
        for name in names {
            match name {
                Value::String(name) => {
                    converted.insert(name, Value::Table(Table::new()));
                }
                other => {
                    return Err(format!(
                        "`{LEGACY_SERVICES_KEY}` entries must be strings, found {}",
                        other.type_str()
                    ));
                }
            }
        }
    }

    if let Some(service) = legacy.remove(LEGACY_SERVICE_KEY) {
        let settings = match service {
            Value::Table(settings) => settings,
            other => {
                return Err(format!(
                    "`{LEGACY_SERVICE_KEY}` must be a table, found {}",
                    other.type_str()
                ));
            }
        };
        for (name, value) in settings {
            if !value.is_table() {
                return Err(format!(
                    "`{LEGACY_SERVICE_KEY}.{name}` must be a table, found {}",
                    value.type_str()
                ));
            }
            converted.insert(name, value);
        }
    }

    converted.insert(COMMON_SECTION.to_string(), Value::Table(legacy));
    Ok(converted)
}

/// Migrates the instance at `paths` if it still uses the legacy layout.
///
/// # Errors
///
/// Returns `Error::Configuration` for a malformed legacy document and
/// `Error::ConfigDocumentAlreadyExists` if another process wrote
/// `services.toml` first.
#[instrument(skip_all, fields(instance = %paths.root.display()))]
pub fn migrate(paths: &InstancePaths) -> Result<MigrationOutcome> {
    if paths.services_file.is_file() {
        return Ok(MigrationOutcome::Current);
    }

    if !paths.legacy_config_file.is_file() {
        warn!("Instance has no configuration document; creation may have been interrupted");
        return Ok(MigrationOutcome::Incomplete);
    }

    info!("Converting legacy instance configuration");

    let legacy = read_toml(&paths.legacy_config_file)?;
    let converted =
        convert_legacy(legacy).map_err(|reason| Error::config(&paths.legacy_config_file, reason))?;
    commit(paths, &converted)?;

    debug!("Legacy configuration converted");
    Ok(MigrationOutcome::Migrated)
}

/// Writes the converted document; loses to any `services.toml` written since
/// the gate was checked.
fn commit(paths: &InstancePaths, converted: &Table) -> Result<()> {
    let text = toml::to_string(converted).map_err(|e| Error::config(&paths.services_file, e))?;
    write_new(&paths.services_file, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn table(text: &str) -> Table {
        text.parse().expect("failed to parse test document")
    }

    #[test]
    fn test_convert_legacy() {
        let legacy = table(
            "services = [\"net\"]\nnetwork = true\n\n[service.net]\nallow = true\n",
        );

        let converted = convert_legacy(legacy).expect("conversion failed");

        assert_eq!(
            converted,
            table("[net]\nallow = true\n\n[common]\nnetwork = true\n")
        );
    }

    #[test]
    fn test_convert_listed_services_default_to_empty() {
        let converted = convert_legacy(table("services = [\"network\", \"x11\"]\n")).unwrap();

        assert_eq!(converted["network"], Value::Table(Table::new()));
        assert_eq!(converted["x11"], Value::Table(Table::new()));
        assert_eq!(converted["common"], Value::Table(Table::new()));
    }

    #[test]
    fn test_convert_empty_document() {
        let converted = convert_legacy(Table::new()).unwrap();
        assert_eq!(converted, table("[common]\n"));
    }

    #[test]
    fn test_migrate_loses_race_to_concurrent_writer() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let paths = InstancePaths::new(temp.path());
        fs::write(&paths.legacy_config_file, "services = [\"network\"]\n").unwrap();

        assert_eq!(migrate(&paths).unwrap(), MigrationOutcome::Migrated);
        let first = fs::read_to_string(&paths.services_file).unwrap();

        // Another process converted the same document after our gate check.
        let converted = convert_legacy(read_toml(&paths.legacy_config_file).unwrap()).unwrap();
        let err = commit(&paths, &converted).unwrap_err();

        assert!(
            matches!(err, Error::ConfigDocumentAlreadyExists { ref path } if *path == paths.services_file)
        );
        assert_eq!(fs::read_to_string(&paths.services_file).unwrap(), first);
    }

    #[test]
    fn test_migrate_incomplete_instance() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let paths = InstancePaths::new(temp.path());

        assert_eq!(migrate(&paths).unwrap(), MigrationOutcome::Incomplete);
        assert!(!paths.services_file.exists());
    }

    #[test]
    fn test_convert_rejects_malformed() {
        assert!(convert_legacy(table("services = \"network\"\n")).is_err());
        assert!(convert_legacy(table("services = [1]\n")).is_err());
        assert!(convert_legacy(table("service = 3\n")).is_err());
        assert!(convert_legacy(table("[service]\nnetwork = 1\n")).is_err());
    }
}
