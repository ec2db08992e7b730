//! Error types for hutch.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// No instances directory contains the requested instance.
    #[error("Instance {name} not found")]
    #[diagnostic(
        code(hutch::instance::not_found),
        help("List existing instances with: hutch list instances")
    )]
    InstanceNotFound { name: String },

    /// No profile directory contains the requested profile.
    #[error("Profile {name} not found")]
    #[diagnostic(
        code(hutch::profile::not_found),
        help("List available profiles with: hutch list profiles")
    )]
    ProfileNotFound { name: String },

    /// Instance directory already exists in the primary instances directory.
    #[error("Instance {name} already exists at {}", path.display())]
    #[diagnostic(
        code(hutch::instance::exists),
        help("Pick another name; existing instances are never overwritten")
    )]
    InstanceAlreadyExists { name: String, path: PathBuf },

    /// An exclusive write of a configuration document found the file already present.
    #[error("Configuration document already exists: {}", path.display())]
    #[diagnostic(code(hutch::config::exists))]
    ConfigDocumentAlreadyExists { path: PathBuf },

    /// Malformed profile, instance or services document.
    #[error("Invalid configuration in {}: {reason}", path.display())]
    #[diagnostic(code(hutch::config::invalid))]
    Configuration { path: PathBuf, reason: String },

    /// Instance or profile name that is not a single path component.
    #[error("Invalid name {name:?}: {reason}")]
    #[diagnostic(code(hutch::instance::invalid_name))]
    InvalidName { name: String, reason: String },

    /// Home or XDG base directories could not be determined.
    #[error("Could not determine the user's home directory")]
    #[diagnostic(
        code(hutch::dirs::home),
        help("Set HOME, or point HUTCH_CONFDIRS and HUTCH_DATADIRS at explicit directories")
    )]
    HomeDirectoryUnavailable,

    /// I/O error with context.
    #[error("I/O error: {context}")]
    #[diagnostic(code(hutch::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O error with a description of the failed operation.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Builds a configuration error for the document at `path`.
    pub(crate) fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors turning a services document into launch contributions.
#[derive(Error, Debug, Diagnostic)]
pub enum ServiceError {
    /// Service name with no built-in implementation.
    #[error("unknown service {name:?}")]
    #[diagnostic(code(hutch::service::unknown))]
    UnknownService { name: String },

    /// Service settings that do not match the service's schema.
    #[error("invalid settings for service {service:?}: {reason}")]
    #[diagnostic(code(hutch::service::invalid))]
    InvalidSettings { service: String, reason: String },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
