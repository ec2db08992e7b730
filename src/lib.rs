//! Hutch - persistent application sandboxes on top of bubblewrap.
//!
//! Applications run inside named *instances*: a private home directory plus a
//! per-service configuration document. Instances are seeded from reusable
//! *profiles*, and every launch is described by a [`sandbox::LaunchSpec`]
//! assembled from a default baseline, the instance itself and its services.
//!
//! # Platform Requirements
//!
//! - Linux with unprivileged user namespaces
//! - `bwrap` on `PATH` to actually run a [`launch::LaunchPlan`]
//!
//! # Example
//!
//! ```no_run
//! use hutch::dirs::Directories;
//! use hutch::instance::{CreateOptions, InstanceManager};
//! use hutch::launch::LaunchPlan;
//! use hutch::sandbox::ServiceContext;
//!
//! let manager = InstanceManager::new(Directories::from_env()?);
//! let instance = manager.create_instance(&CreateOptions::new("web").with_profile("firefox"))?;
//!
//! let context = ServiceContext { host_home: "/home/alice".into() };
//! let plan = LaunchPlan::assemble(&instance, &context, &[])?;
//! println!("{}", plan.argv().join(" "));
//! # Ok::<(), hutch::Error>(())
//! ```

pub mod desktop;
pub mod dirs;
pub mod error;
pub mod instance;
pub mod launch;
pub mod profile;
pub mod sandbox;

// Re-export commonly used types
pub use error::{Error, Result};
pub use instance::{CreateOptions, Instance, InstanceManager};
pub use launch::LaunchPlan;
pub use profile::Profile;
pub use sandbox::{LaunchSpec, ServicesConfig};
