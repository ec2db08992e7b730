//! Launch specifications for the external isolation engine.
//!
//! A launch is described by a [`LaunchSpec`]: the [default baseline](defaults)
//! merged with the contributions of every enabled [service](services). The
//! isolation engine (bubblewrap) consumes the flattened argument vector; file
//! injections and preserved environment variables travel through separate
//! channels.
//!
//! # Example
//!
//! ```
//! use hutch::sandbox::{LaunchSpec, default_spec};
//!
//! let spec = default_spec()
//!     .clone()
//!     .merge(LaunchSpec::new().with_shared_network());
//!
//! let args = spec.to_args();
//! assert_eq!(&args[..3], ["--ro-bind", "/usr", "/usr"]);
//! assert!(spec.share_network);
//! ```

pub mod defaults;
pub mod services;
mod spec;

pub use defaults::{SANDBOX_HOME, UserIdentity, baseline, default_spec};
pub use services::{ServiceContext, ServiceKind, ServicesConfig};
pub use spec::{Directive, DirectiveKind, FileInjection, LaunchSpec};
