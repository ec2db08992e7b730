//! Default baseline merged under every launch.

use std::sync::OnceLock;

use nix::unistd::{getgid, getuid};

use super::LaunchSpec;

/// Home directory of the synthetic user inside the sandbox.
pub const SANDBOX_HOME: &str = "/home/user";

/// Numeric identity of the invoking user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl UserIdentity {
    /// Reads the real uid/gid of this process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
        }
    }
}

static DEFAULT_SPEC: OnceLock<LaunchSpec> = OnceLock::new();

/// Returns the process-wide default spec, built on first use for the current user.
pub fn default_spec() -> &'static LaunchSpec {
    DEFAULT_SPEC.get_or_init(|| baseline(UserIdentity::current()))
}

/// Builds the default spec for `identity`.
///
/// Exposes a minimal read-only root, a synthetic `/etc/passwd` and
/// `/etc/group` for a single user named `user`, and the base environment.
#[must_use]
pub fn baseline(identity: UserIdentity) -> LaunchSpec {
    let UserIdentity { uid, gid } = identity;

    LaunchSpec::new()
        .with_ro_bind("/usr", None::<String>)
        .with_ro_bind("/etc/resolv.conf", None::<String>)
        .with_ro_bind("/etc/login.defs", None::<String>)
        .with_ro_bind("/etc/fonts/", None::<String>)
        .with_dir("/tmp")
        .with_dir("/var")
        .with_dir(SANDBOX_HOME)
        .with_symlink("usr/lib", "/lib")
        .with_symlink("usr/lib64", "/lib64")
        .with_symlink("usr/bin", "/bin")
        .with_symlink("usr/sbin", "/sbin")
        .with_file(
            format!("user:x:{uid}:{uid}::{SANDBOX_HOME}:/bin/sh"),
            "/etc/passwd",
        )
        .with_file(format!("user:x:{gid}:"), "/etc/group")
        .with_env("USER", "user")
        .with_env("USERNAME", "user")
        .with_env_preserve("LANG")
}
