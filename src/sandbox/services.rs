//! Per-service configuration documents and the built-in services.
//!
//! An instance stores its configuration as one TOML table per enabled service:
//!
//! ```toml
//! [common]
//! executable_name = ["firefox"]
//!
//! [network]
//!
//! [home_share]
//! home_paths = ["Downloads"]
//! ```
//!
//! Each service turns its table into a [`LaunchSpec`]; the services of a
//! document are merged in document order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use toml::Table;
use tracing::trace;

use super::LaunchSpec;
use super::defaults::SANDBOX_HOME;
use crate::error::ServiceError;

/// Built-in service types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Settings shared by every instance: launch command, network flag.
    Common,
    /// Shares the host network.
    Network,
    /// Binds paths from the host home into the sandbox home.
    HomeShare,
    /// Binds arbitrary host paths.
    RootShare,
    /// Sets or preserves environment variables.
    Environment,
    /// Raw trailing arguments for the isolation engine.
    Raw,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Common,
        ServiceKind::Network,
        ServiceKind::HomeShare,
        ServiceKind::RootShare,
        ServiceKind::Environment,
        ServiceKind::Raw,
    ];

    /// Table name of the service in a services document.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Network => "network",
            Self::HomeShare => "home_share",
            Self::RootShare => "root_share",
            Self::Environment => "environment",
            Self::Raw => "raw",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Host facts services need to build their contributions.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Home directory of the invoking user on the host.
    pub host_home: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommonSettings {
    executable_name: Option<ExecutableName>,
    #[serde(default)]
    network: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExecutableName {
    Single(String),
    Argv(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkSettings {}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HomeShareSettings {
    #[serde(default)]
    home_paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootShareSettings {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    read_only_paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvironmentSettings {
    #[serde(default)]
    set: BTreeMap<String, String>,
    #[serde(default)]
    preserve: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    args: Vec<String>,
}

fn settings<T: DeserializeOwned>(kind: ServiceKind, table: &Table) -> Result<T, ServiceError> {
    toml::Value::Table(table.clone())
        .try_into()
        .map_err(|e: toml::de::Error| ServiceError::InvalidSettings {
            service: kind.name().to_string(),
            reason: e.message().to_string(),
        })
}

fn contribution(
    kind: ServiceKind,
    table: &Table,
    context: &ServiceContext,
) -> Result<LaunchSpec, ServiceError> {
    let mut spec = LaunchSpec::new();

    match kind {
        ServiceKind::Common => {
            let common: CommonSettings = settings(kind, table)?;
            spec.share_network = common.network;
        }
        ServiceKind::Network => {
            let _: NetworkSettings = settings(kind, table)?;
            spec.share_network = true;
        }
        ServiceKind::HomeShare => {
            let share: HomeShareSettings = settings(kind, table)?;
            for path in share.home_paths {
                let relative = path.trim_start_matches('/');
                let source = context.host_home.join(relative);
                spec = spec.with_bind(
                    source.to_string_lossy(),
                    Some(format!("{SANDBOX_HOME}/{relative}")),
                );
            }
        }
        ServiceKind::RootShare => {
            let share: RootShareSettings = settings(kind, table)?;
            for path in share.paths {
                spec = spec.with_bind(path, None::<String>);
            }
            for path in share.read_only_paths {
                spec = spec.with_ro_bind(path, None::<String>);
            }
        }
        ServiceKind::Environment => {
            let env: EnvironmentSettings = settings(kind, table)?;
            for (name, value) in env.set {
                spec = spec.with_env(name, value);
            }
            for name in env.preserve {
                spec = spec.with_env_preserve(name);
            }
        }
        ServiceKind::Raw => {
            let raw: RawSettings = settings(kind, table)?;
            spec = spec.with_extra_args(raw.args);
        }
    }

    Ok(spec)
}

/// Per-service configuration document of an instance or profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicesConfig {
    table: Table,
}

impl ServicesConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already parsed document.
    #[must_use]
    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    /// Parses a services document from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML parse error unchanged.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        text.parse::<Table>().map(Self::from_table)
    }

    /// Serializes the document back to TOML.
    ///
    /// # Errors
    ///
    /// Returns the serializer error unchanged.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(&self.table)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Names of the configured services, in document order.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    fn services(&self) -> impl Iterator<Item = Result<(ServiceKind, &Table), ServiceError>> {
        self.table.iter().map(|(name, value)| {
            let kind = ServiceKind::from_name(name).ok_or_else(|| ServiceError::UnknownService {
                name: name.clone(),
            })?;
            let table = value
                .as_table()
                .ok_or_else(|| ServiceError::InvalidSettings {
                    service: name.clone(),
                    reason: format!("expected a table, found {}", value.type_str()),
                })?;
            Ok((kind, table))
        })
    }

    /// Merges every configured service's contribution, in document order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` for unknown services or malformed settings.
    pub fn launch_spec(&self, context: &ServiceContext) -> Result<LaunchSpec, ServiceError> {
        let mut spec = LaunchSpec::new();
        for service in self.services() {
            let (kind, table) = service?;
            trace!(service = %kind, "Merging service contribution");
            spec.extend(contribution(kind, table, context)?);
        }
        Ok(spec)
    }

    /// Launch command configured by the `common` service, if any.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidSettings` if `common` is malformed.
    pub fn command(&self) -> Result<Option<Vec<String>>, ServiceError> {
        let Some(value) = self.table.get(ServiceKind::Common.name()) else {
            return Ok(None);
        };
        let table = value
            .as_table()
            .ok_or_else(|| ServiceError::InvalidSettings {
                service: ServiceKind::Common.name().to_string(),
                reason: format!("expected a table, found {}", value.type_str()),
            })?;
        let common: CommonSettings = settings(ServiceKind::Common, table)?;

        Ok(common.executable_name.map(|name| match name {
            ExecutableName::Single(exe) => vec![exe],
            ExecutableName::Argv(argv) => argv,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Directive, DirectiveKind};

    fn context() -> ServiceContext {
        ServiceContext {
            host_home: PathBuf::from("/home/alice"),
        }
    }

    fn parse(text: &str) -> ServicesConfig {
        ServicesConfig::from_toml_str(text).expect("failed to parse services")
    }

    #[test]
    fn test_service_names_round_trip() {
        for kind in ServiceKind::ALL {
            assert_eq!(ServiceKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ServiceKind::from_name("pulse_audio"), None);
    }

    #[test]
    fn test_empty_document_contributes_nothing() {
        let spec = ServicesConfig::new()
            .launch_spec(&context())
            .expect("empty document should be valid");
        assert_eq!(spec, LaunchSpec::new());
    }

    #[test]
    fn test_network_services() {
        let spec = parse("[network]\n").launch_spec(&context()).unwrap();
        assert!(spec.share_network);

        let spec = parse("[common]\nnetwork = true\n")
            .launch_spec(&context())
            .unwrap();
        assert!(spec.share_network);

        let spec = parse("[common]\n").launch_spec(&context()).unwrap();
        assert!(!spec.share_network);
    }

    #[test]
    fn test_home_share_binds_into_sandbox_home() {
        let spec = parse("[home_share]\nhome_paths = [\"Downloads\", \"/Music\"]\n")
            .launch_spec(&context())
            .unwrap();

        assert_eq!(
            spec.to_args(),
            [
                "--bind",
                "/home/alice/Downloads",
                "/home/user/Downloads",
                "--bind",
                "/home/alice/Music",
                "/home/user/Music",
            ]
        );
    }

    #[test]
    fn test_services_merge_in_document_order() {
        let spec = parse(
            "[root_share]\npaths = [\"/srv/b\"]\n\n[raw]\nargs = [\"--new-session\"]\n\n\
             [environment]\nset = { EDITOR = \"vi\" }\npreserve = [\"TERM\"]\n",
        )
        .launch_spec(&context())
        .unwrap();

        let binds: Vec<_> = spec.directives_of(DirectiveKind::Bind).collect();
        assert_eq!(
            binds,
            [&Directive::Bind {
                source: "/srv/b".to_string(),
                dest: None
            }]
        );
        assert!(spec.env_preserve.contains("TERM"));
        assert_eq!(spec.extra_args, ["--new-session"]);
        assert_eq!(
            spec.to_args(),
            ["--bind", "/srv/b", "/srv/b", "--setenv", "EDITOR", "vi", "--new-session"]
        );
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let err = parse("[pulse_audio]\n").launch_spec(&context()).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownService { ref name } if name == "pulse_audio"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = parse("[network]\nallow = true\n")
            .launch_spec(&context())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSettings { .. }));
    }

    #[test]
    fn test_non_table_service_is_rejected() {
        let err = parse("network = true\n").launch_spec(&context()).unwrap_err();
        assert!(err.to_string().contains("expected a table"));
    }

    #[test]
    fn test_command() {
        assert_eq!(parse("[network]\n").command().unwrap(), None);
        assert_eq!(
            parse("[common]\nexecutable_name = \"firefox\"\n")
                .command()
                .unwrap(),
            Some(vec!["firefox".to_string()])
        );
        assert_eq!(
            parse("[common]\nexecutable_name = [\"firefox\", \"--no-remote\"]\n")
                .command()
                .unwrap(),
            Some(vec!["firefox".to_string(), "--no-remote".to_string()])
        );
    }
}
