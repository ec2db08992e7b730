//! Launch plans: everything the isolation engine needs for one instance.
//!
//! A plan layers three contributions, in this order:
//!
//! 1. the default baseline ([`default_spec`]),
//! 2. the instance itself (its home bound to `/home/user`),
//! 3. every service in the instance's services document, in document order.
//!
//! The result is flattened into an argument vector for bubblewrap plus the
//! out-of-band channels: files to inject and host variables to preserve.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::{Command, ExitStatus};

use serde::{Serialize, Serializer};
use tracing::{debug, instrument};

use crate::error::{Error, Result, ServiceError};
use crate::instance::Instance;
use crate::sandbox::{LaunchSpec, SANDBOX_HOME, ServiceContext, default_spec};

/// Isolation engine executable.
pub const ISOLATION_ENGINE: &str = "bwrap";

/// Namespace flags that precede every launch.
const BASE_ARGS: [&str; 2] = ["--unshare-all", "--die-with-parent"];

/// Injected files are written into a pipe before the engine starts, so each
/// must fit in the default pipe buffer.
const MAX_INJECTED_FILE_SIZE: usize = 64 * 1024;

/// A file handed to the isolation engine out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    pub dest: String,
    #[serde(serialize_with = "serialize_lossy")]
    pub content: Vec<u8>,
}

fn serialize_lossy<S: Serializer>(content: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(content))
}

/// Fully assembled launch for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    /// Isolation engine arguments, without the engine itself or the command.
    pub args: Vec<String>,
    /// Files to inject.
    pub files: Vec<PlannedFile>,
    /// Host variables kept when the environment is cleared.
    pub env_preserve: BTreeSet<String>,
    /// Whether the host network is shared.
    pub share_network: bool,
    /// Command run inside the sandbox.
    pub command: Vec<String>,
}

impl LaunchPlan {
    /// Flattens a merged spec into a plan running `command`.
    #[must_use]
    pub fn from_spec(spec: &LaunchSpec, command: Vec<String>) -> Self {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|arg| arg.to_string()).collect();
        if spec.share_network {
            args.push("--share-net".to_string());
        }
        args.extend(spec.to_args());

        Self {
            args,
            files: spec
                .files()
                .map(|file| PlannedFile {
                    dest: file.dest.to_string(),
                    content: file.content.to_vec(),
                })
                .collect(),
            env_preserve: spec.env_preserve.clone(),
            share_network: spec.share_network,
            command,
        }
    }

    /// Assembles the plan for `instance`.
    ///
    /// A non-empty `command` overrides the `common.executable_name` setting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the services document is missing or
    /// malformed, or if no command is configured or given.
    #[instrument(skip_all, fields(instance = %instance.name))]
    pub fn assemble(
        instance: &Instance,
        context: &ServiceContext,
        command: &[String],
    ) -> Result<Self> {
        let services = instance.read_services()?;
        let services_error = |e: ServiceError| Error::config(&instance.paths.services_file, e);

        let command = if command.is_empty() {
            services
                .command()
                .map_err(services_error)?
                .filter(|command| !command.is_empty())
                .ok_or_else(|| {
                    Error::config(
                        &instance.paths.services_file,
                        "no command given and `common.executable_name` is not set",
                    )
                })?
        } else {
            command.to_vec()
        };

        let mut spec = default_spec().clone();
        spec.extend(instance_spec(instance));
        spec.extend(services.launch_spec(context).map_err(services_error)?);

        debug!(?command, share_network = spec.share_network, "Assembled launch plan");
        Ok(Self::from_spec(&spec, command))
    }

    /// Complete argument vector: engine, arguments, `--`, command.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + self.command.len() + 2);
        argv.push(ISOLATION_ENGINE.to_string());
        argv.extend(self.args.iter().cloned());
        argv.push("--".to_string());
        argv.extend(self.command.iter().cloned());
        argv
    }

    /// Runs the plan with the isolation engine and waits for it to exit.
    ///
    /// The sandbox environment starts empty: preserved variables are copied
    /// from this process and injected files are passed through pipes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if an injected file cannot be staged or the engine
    /// cannot be started.
    pub fn run(&self) -> Result<ExitStatus> {
        self.run_with(Command::new(ISOLATION_ENGINE), |name| std::env::var_os(name))
    }

    /// Appends the plan to `engine`, runs it and waits for it to exit.
    ///
    /// Preserved variables are read through `lookup` and forwarded byte for
    /// byte.
    #[instrument(skip_all, fields(command = ?self.command))]
    fn run_with<F>(&self, mut engine: Command, lookup: F) -> Result<ExitStatus>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut args: Vec<OsString> = vec!["--clearenv".into()];

        for name in &self.env_preserve {
            if let Some(value) = lookup(name) {
                args.extend([OsString::from("--setenv"), OsString::from(name), value]);
            }
        }

        // Read ends must stay open until the engine has been spawned.
        let mut staged = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let fd = stage_file(file)?;
            args.extend([
                OsString::from("--file"),
                OsString::from(fd.as_raw_fd().to_string()),
                OsString::from(&file.dest),
            ]);
            staged.push(fd);
        }

        args.extend(self.args.iter().map(OsString::from));
        args.push("--".into());
        args.extend(self.command.iter().map(OsString::from));

        let program = engine.get_program().to_string_lossy().into_owned();
        debug!(engine = %program, files = staged.len(), "Starting sandbox");
        let status = engine.args(&args).status().map_err(|e| {
            let context = if e.kind() == ErrorKind::NotFound {
                format!("{program} not found on PATH")
            } else {
                format!("failed to start {program}")
            };
            Error::io(context, e)
        })?;
        drop(staged);

        debug!(%status, "Sandbox exited");
        Ok(status)
    }
}

/// Writes `file` into a fresh pipe and returns the inheritable read end.
fn stage_file(file: &PlannedFile) -> Result<OwnedFd> {
    let context = || format!("failed to stage injected file: {}", file.dest);

    if file.content.len() > MAX_INJECTED_FILE_SIZE {
        return Err(Error::io(
            context(),
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("content exceeds {MAX_INJECTED_FILE_SIZE} bytes"),
            ),
        ));
    }

    let (read, write) = nix::unistd::pipe().map_err(|e| Error::io(context(), e.into()))?;
    let mut writer = File::from(write);
    writer
        .write_all(&file.content)
        .map_err(|e| Error::io(context(), e))?;
    drop(writer);

    Ok(read)
}

/// Contribution of the instance directory itself.
fn instance_spec(instance: &Instance) -> LaunchSpec {
    LaunchSpec::new()
        .with_bind(instance.paths.home.to_string_lossy(), Some(SANDBOX_HOME))
        .with_extra_args(["--chdir", SANDBOX_HOME])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ServicesConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn context() -> ServiceContext {
        ServiceContext {
            host_home: PathBuf::from("/home/alice"),
        }
    }

    fn instance_with(temp: &TempDir, services: &str) -> Instance {
        let instance = Instance::new("web", temp.path().join("web"));
        instance.paths.create_directories("web").unwrap();
        instance
            .save_services(&ServicesConfig::from_toml_str(services).unwrap())
            .unwrap();
        instance
    }

    #[test]
    fn test_from_spec_network_flag() {
        let plan = LaunchPlan::from_spec(&LaunchSpec::new(), vec!["sh".to_string()]);
        assert_eq!(plan.args, ["--unshare-all", "--die-with-parent"]);

        let plan = LaunchPlan::from_spec(
            &LaunchSpec::new().with_shared_network(),
            vec!["sh".to_string()],
        );
        assert_eq!(plan.args, ["--unshare-all", "--die-with-parent", "--share-net"]);
        assert_eq!(
            plan.argv(),
            ["bwrap", "--unshare-all", "--die-with-parent", "--share-net", "--", "sh"]
        );
    }

    #[test]
    fn test_assemble_layers_default_instance_and_services() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let instance = instance_with(
            &temp,
            "[common]\nexecutable_name = \"firefox\"\n\n[network]\n\n\
             [raw]\nargs = [\"--new-session\"]\n",
        );

        let plan = LaunchPlan::assemble(&instance, &context(), &[]).unwrap();

        assert_eq!(plan.command, ["firefox"]);
        assert!(plan.share_network);
        assert!(plan.env_preserve.contains("LANG"));
        assert_eq!(plan.files.len(), 2);

        let home = instance.paths.home.to_string_lossy().into_owned();
        let bind = plan
            .args
            .windows(3)
            .position(|w| w == ["--bind", home.as_str(), "/home/user"]);
        assert!(bind.is_some(), "instance home is bound: {:?}", plan.args);
        assert_eq!(
            &plan.args[plan.args.len() - 3..],
            ["--chdir", "/home/user", "--new-session"]
        );
    }

    #[test]
    fn test_assemble_command_override() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let instance = instance_with(&temp, "[common]\nexecutable_name = \"firefox\"\n");

        let plan =
            LaunchPlan::assemble(&instance, &context(), &["bash".to_string()]).unwrap();
        assert_eq!(plan.command, ["bash"]);
        assert!(!plan.share_network);
    }

    #[test]
    fn test_assemble_requires_command() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let instance = instance_with(&temp, "[network]\n");

        let err = LaunchPlan::assemble(&instance, &context(), &[]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_assemble_rejects_unknown_service() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let instance = instance_with(&temp, "[pulse_audio]\n");

        let err = LaunchPlan::assemble(&instance, &context(), &["sh".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown service"));
    }

    #[test]
    fn test_stage_file_rejects_oversized_content() {
        let file = PlannedFile {
            dest: "/etc/big".to_string(),
            content: vec![b'x'; MAX_INJECTED_FILE_SIZE + 1],
        };
        assert!(matches!(stage_file(&file), Err(Error::Io { .. })));
    }

    #[test]
    fn test_stage_file_pipe_carries_content() {
        use std::io::Read;

        let file = PlannedFile {
            dest: "/etc/group".to_string(),
            content: b"user:x:1000:".to_vec(),
        };
        let mut reader = File::from(stage_file(&file).unwrap());
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "user:x:1000:");
    }

    /// Engine stand-in that writes one argument per line to `out`.
    fn recording_engine(out: &std::path::Path) -> Command {
        let mut engine = Command::new("sh");
        engine
            .arg("-c")
            .arg("printf '%s\\n' \"$@\" > \"$0\"")
            .arg(out);
        engine
    }

    #[test]
    fn test_run_forwards_preserved_values_unchanged() {
        use std::os::unix::ffi::OsStringExt;

        let temp = TempDir::new().expect("failed to create temp dir");
        let out = temp.path().join("argv");
        let spec = LaunchSpec::new()
            .with_env_preserve("LANG")
            .with_env_preserve("UNSET_VAR");
        let plan = LaunchPlan::from_spec(&spec, vec!["true".to_string()]);

        let status = plan
            .run_with(recording_engine(&out), |name| {
                (name == "LANG").then(|| OsString::from_vec(b"caf\xe9".to_vec()))
            })
            .unwrap();
        assert!(status.success());

        let recorded = std::fs::read(&out).unwrap();
        let argv: Vec<&[u8]> = recorded
            .strip_suffix(b"\n")
            .unwrap()
            .split(|&b| b == b'\n')
            .collect();
        let expected: [&[u8]; 8] = [
            b"--clearenv",
            b"--setenv",
            b"LANG",
            b"caf\xe9",
            b"--unshare-all",
            b"--die-with-parent",
            b"--",
            b"true",
        ];
        assert_eq!(argv, expected);
    }

    #[test]
    fn test_run_passes_injected_files() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let out = temp.path().join("argv");
        let spec = LaunchSpec::new().with_file("user:x:1000:", "/etc/group");
        let plan = LaunchPlan::from_spec(&spec, vec!["true".to_string()]);

        plan.run_with(recording_engine(&out), |_| None).unwrap();

        let recorded = std::fs::read_to_string(&out).unwrap();
        let argv: Vec<&str> = recorded.lines().collect();
        assert_eq!(argv[1], "--file");
        assert!(argv[2].parse::<i32>().is_ok(), "fd number: {}", argv[2]);
        assert_eq!(argv[3], "/etc/group");
    }

    #[test]
    fn test_run_reports_missing_engine() {
        let plan = LaunchPlan::from_spec(&LaunchSpec::new(), vec!["true".to_string()]);

        let err = plan
            .run_with(Command::new("hutch-test-no-such-engine"), |_| None)
            .unwrap_err();
        assert!(err.to_string().contains("hutch-test-no-such-engine not found"));
    }

    #[test]
    fn test_plan_serializes_file_content_as_text() {
        let spec = LaunchSpec::new().with_file("user:x:1:", "/etc/group");
        let plan = LaunchPlan::from_spec(&spec, vec![]);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["files"][0]["content"], "user:x:1:");
        assert_eq!(json["files"][0]["dest"], "/etc/group");
    }
}
