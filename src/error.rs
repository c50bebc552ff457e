//! Error taxonomy for a single link resolution.
//!
//! Library functions return `anyhow::Result` and raise these as typed values, so
//! callers can tell the failing stage apart with `downcast_ref::<PkglinkError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkglinkError {
    /// Malformed source string or argument. Never retried.
    #[error("parse: invalid source '{token}': {reason}")]
    SpecParse { token: String, reason: String },

    /// Both installation strategies failed.
    #[error("install: failed to install {spec}:\n{diagnostics}")]
    Installation { spec: String, diagnostics: String },

    /// No resolver strategy produced a directory.
    #[error("resolve: could not find a directory matching '{requested}' in {root:?}")]
    Resolution { requested: String, root: PathBuf },

    /// The link target exists and points somewhere else.
    #[error(
        "link: {target:?} already exists ({existing}); use --force to replace it"
    )]
    LinkConflict { target: PathBuf, existing: String },

    /// Replacing the target would delete the directory being linked.
    #[error("link: {target:?} contains the link source {linked:?}; refusing to replace it")]
    UnsafeTarget { target: PathBuf, linked: PathBuf },

    /// Invalid batch configuration file.
    #[error("config: {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A package's post-install setup file is unreadable or asks for something unsafe.
    #[error("setup: {path:?}: {reason}")]
    Setup { path: PathBuf, reason: String },
}

impl PkglinkError {
    pub fn spec_parse(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpecParse {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn setup(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Setup {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SpecParse { .. } | Self::Config { .. } | Self::Setup { .. } => 2,
            Self::Installation { .. } => 3,
            Self::Resolution { .. } => 4,
            Self::LinkConflict { .. } | Self::UnsafeTarget { .. } => 5,
        }
    }
}

/// Exit status for any error chain, falling back to 1 for untyped failures.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PkglinkError>())
        .map(PkglinkError::exit_code)
        .unwrap_or(1)
}
