//! Mergeable launch specification for the isolation engine.
//!
//! A [`LaunchSpec`] is the sum of every contribution a launch needs: filesystem
//! binds, directories, symlinks, injected files, environment variables and a few
//! flags. Specs from independent sources are layered with [`LaunchSpec::merge`]
//! and flattened into a bubblewrap argument vector with [`LaunchSpec::to_args`].
//!
//! # Example
//!
//! ```
//! use hutch::sandbox::LaunchSpec;
//!
//! let base = LaunchSpec::new().with_ro_bind("/usr", None::<String>);
//! let net = LaunchSpec::new().with_shared_network().with_bind("/srv", Some("/data"));
//!
//! let spec = base.merge(net);
//! assert!(spec.share_network);
//! assert_eq!(
//!     spec.to_args(),
//!     ["--bind", "/srv", "/data", "--ro-bind", "/usr", "/usr"]
//! );
//! ```

use std::collections::BTreeSet;

use serde::Serialize;

/// Kind of a [`Directive`].
///
/// The declaration order is the order in which kinds are flattened into the
/// argument vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Bind,
    ReadOnlyBind,
    DirCreate,
    Symlink,
    EnvSet,
    FileInject,
}

impl DirectiveKind {
    /// Kinds that appear in the argument vector, in emission order.
    pub const ARGUMENT_ORDER: [DirectiveKind; 5] = [
        DirectiveKind::Bind,
        DirectiveKind::ReadOnlyBind,
        DirectiveKind::DirCreate,
        DirectiveKind::Symlink,
        DirectiveKind::EnvSet,
    ];

    /// Flag word passed to the isolation engine, if the kind has one.
    ///
    /// File injections travel out of band and have no flag word.
    #[must_use]
    pub const fn arg_word(self) -> Option<&'static str> {
        match self {
            Self::Bind => Some("--bind"),
            Self::ReadOnlyBind => Some("--ro-bind"),
            Self::DirCreate => Some("--dir"),
            Self::Symlink => Some("--symlink"),
            Self::EnvSet => Some("--setenv"),
            Self::FileInject => None,
        }
    }
}

/// A single sandbox setup action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Read-write bind of a host path. `dest` defaults to `source`.
    Bind { source: String, dest: Option<String> },
    /// Read-only bind of a host path. `dest` defaults to `source`.
    ReadOnlyBind { source: String, dest: Option<String> },
    /// Directory created inside the sandbox.
    DirCreate { dest: String },
    /// Symlink at `dest` pointing to `source`.
    Symlink { source: String, dest: String },
    /// File written into the sandbox at `dest`.
    FileInject {
        #[serde(skip)]
        content: Vec<u8>,
        dest: String,
    },
    /// Environment variable set inside the sandbox.
    EnvSet { name: String, value: String },
}

impl Directive {
    #[must_use]
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::Bind { .. } => DirectiveKind::Bind,
            Self::ReadOnlyBind { .. } => DirectiveKind::ReadOnlyBind,
            Self::DirCreate { .. } => DirectiveKind::DirCreate,
            Self::Symlink { .. } => DirectiveKind::Symlink,
            Self::FileInject { .. } => DirectiveKind::FileInject,
            Self::EnvSet { .. } => DirectiveKind::EnvSet,
        }
    }

    /// Argument sub-sequence for this directive: flag word followed by fields.
    ///
    /// Returns an empty vector for file injections.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let Some(word) = self.kind().arg_word() else {
            return Vec::new();
        };

        let mut args = vec![word.to_string()];
        match self {
            Self::Bind { source, dest } | Self::ReadOnlyBind { source, dest } => {
                args.push(source.clone());
                args.push(dest.as_ref().unwrap_or(source).clone());
            }
            Self::DirCreate { dest } => args.push(dest.clone()),
            Self::Symlink { source, dest } => {
                args.push(source.clone());
                args.push(dest.clone());
            }
            Self::EnvSet { name, value } => {
                args.push(name.clone());
                args.push(value.clone());
            }
            Self::FileInject { .. } => unreachable!("file injections have no flag word"),
        }
        args
    }
}

/// A file to be handed to the isolation engine out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInjection<'a> {
    pub content: &'a [u8],
    pub dest: &'a str,
}

/// Everything a sandbox launch needs, assembled from layered contributions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    /// Directives in contribution order.
    pub directives: Vec<Directive>,

    /// Share the host network instead of creating a network namespace.
    pub share_network: bool,

    /// Host environment variables kept when the environment is cleared.
    pub env_preserve: BTreeSet<String>,

    /// Raw arguments emitted after all directives.
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directive, keeping contribution order.
    pub fn push(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    /// Layers `addition` on top of this spec.
    ///
    /// Directives and raw arguments are appended after ours, network sharing
    /// is OR-ed and preserved variables are unioned. Nothing is deduplicated.
    pub fn extend(&mut self, addition: LaunchSpec) {
        self.directives.extend(addition.directives);
        self.share_network |= addition.share_network;
        self.env_preserve.extend(addition.env_preserve);
        self.extra_args.extend(addition.extra_args);
    }

    /// Owned form of [`LaunchSpec::extend`].
    #[must_use]
    pub fn merge(mut self, addition: LaunchSpec) -> Self {
        self.extend(addition);
        self
    }

    /// Directives of one kind, in contribution order.
    pub fn directives_of(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.kind() == kind)
    }

    /// Flattens the spec into the isolation engine's argument vector.
    ///
    /// Binds, read-only binds, directories, symlinks and environment variables
    /// are emitted in that kind order, each kind in contribution order, then the
    /// raw arguments. File injections and preserved variables are not part of
    /// the vector; see [`LaunchSpec::files`] and [`LaunchSpec::env_preserve`].
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for kind in DirectiveKind::ARGUMENT_ORDER {
            for directive in self.directives_of(kind) {
                args.extend(directive.to_args());
            }
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Files to inject, in contribution order.
    pub fn files(&self) -> impl Iterator<Item = FileInjection<'_>> {
        self.directives.iter().filter_map(|d| match d {
            Directive::FileInject { content, dest } => Some(FileInjection { content, dest }),
            _ => None,
        })
    }

    /// Adds a read-write bind.
    #[must_use]
    pub fn with_bind(mut self, source: impl Into<String>, dest: Option<impl Into<String>>) -> Self {
        self.push(Directive::Bind {
            source: source.into(),
            dest: dest.map(Into::into),
        });
        self
    }

    /// Adds a read-only bind.
    #[must_use]
    pub fn with_ro_bind(
        mut self,
        source: impl Into<String>,
        dest: Option<impl Into<String>>,
    ) -> Self {
        self.push(Directive::ReadOnlyBind {
            source: source.into(),
            dest: dest.map(Into::into),
        });
        self
    }

    /// Adds a directory to create.
    #[must_use]
    pub fn with_dir(mut self, dest: impl Into<String>) -> Self {
        self.push(Directive::DirCreate { dest: dest.into() });
        self
    }

    /// Adds a symlink at `dest` pointing to `source`.
    #[must_use]
    pub fn with_symlink(mut self, source: impl Into<String>, dest: impl Into<String>) -> Self {
        self.push(Directive::Symlink {
            source: source.into(),
            dest: dest.into(),
        });
        self
    }

    /// Adds a file to inject.
    #[must_use]
    pub fn with_file(mut self, content: impl Into<Vec<u8>>, dest: impl Into<String>) -> Self {
        self.push(Directive::FileInject {
            content: content.into(),
            dest: dest.into(),
        });
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Directive::EnvSet {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Keeps a host environment variable.
    #[must_use]
    pub fn with_env_preserve(mut self, name: impl Into<String>) -> Self {
        self.env_preserve.insert(name.into());
        self
    }

    /// Shares the host network.
    #[must_use]
    pub fn with_shared_network(mut self) -> Self {
        self.share_network = true;
        self
    }

    /// Appends raw trailing arguments.
    #[must_use]
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_dest_defaults_to_source() {
        let bind = Directive::Bind {
            source: "/srv".to_string(),
            dest: None,
        };
        assert_eq!(bind.to_args(), ["--bind", "/srv", "/srv"]);

        let ro = Directive::ReadOnlyBind {
            source: "/srv".to_string(),
            dest: Some("/mnt".to_string()),
        };
        assert_eq!(ro.to_args(), ["--ro-bind", "/srv", "/mnt"]);
    }

    #[test]
    fn test_file_inject_has_no_args() {
        let file = Directive::FileInject {
            content: b"x".to_vec(),
            dest: "/etc/x".to_string(),
        };
        assert!(file.to_args().is_empty());
        assert_eq!(file.kind().arg_word(), None);
    }

    #[test]
    fn test_to_args_uses_fixed_kind_order() {
        let spec = LaunchSpec::new()
            .with_env("A", "1")
            .with_symlink("usr/bin", "/bin")
            .with_dir("/tmp")
            .with_ro_bind("/usr", None::<String>)
            .with_bind("/srv", None::<String>)
            .with_extra_args(["--chdir", "/tmp"]);

        assert_eq!(
            spec.to_args(),
            [
                "--bind", "/srv", "/srv", "--ro-bind", "/usr", "/usr", "--dir", "/tmp",
                "--symlink", "usr/bin", "/bin", "--setenv", "A", "1", "--chdir", "/tmp",
            ]
        );
    }

    #[test]
    fn test_merge_keeps_duplicates_and_order() {
        let a = LaunchSpec::new().with_bind("/a", Some("/x"));
        let b = LaunchSpec::new().with_bind("/b", Some("/x"));

        let merged = a.merge(b);
        let binds: Vec<_> = merged.directives_of(DirectiveKind::Bind).collect();
        assert_eq!(binds.len(), 2);
        assert_eq!(
            merged.to_args(),
            ["--bind", "/a", "/x", "--bind", "/b", "/x"]
        );
    }

    #[test]
    fn test_merge_flags() {
        let a = LaunchSpec::new()
            .with_shared_network()
            .with_env_preserve("LANG")
            .with_extra_args(["--one"]);
        let b = LaunchSpec::new()
            .with_env_preserve("LANG")
            .with_env_preserve("TERM")
            .with_extra_args(["--two"]);

        let merged = b.merge(a);
        assert!(merged.share_network);
        assert_eq!(merged.env_preserve.len(), 2);
        assert_eq!(merged.extra_args, ["--two", "--one"]);
    }

    #[test]
    fn test_files_are_out_of_band() {
        let spec = LaunchSpec::new()
            .with_file("root:x:0:", "/etc/group")
            .with_dir("/tmp");

        let files: Vec<_> = spec.files().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].dest, "/etc/group");
        assert_eq!(files[0].content, b"root:x:0:");
        assert_eq!(spec.to_args(), ["--dir", "/tmp"]);
    }
}
