//! Error types for hotload-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::compile::Diagnostic;

/// Result type for hotload-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hotload-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The source text declares no top-level type.
    #[error("name resolution failed: {0}")]
    NameResolution(String),

    /// No usable compiler in this process. Detected once and cached.
    #[error("toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    /// The toolchain rejected the unit.
    #[error("compilation of `{name}` failed with {} diagnostic(s)", diagnostics.len())]
    Compile {
        name: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// The toolchain did not finish before the deadline.
    #[error("compilation of `{name}` timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// Name is not loaded, registered, or defined by any archive.
    #[error("cannot resolve `{name}`")]
    Resolution { name: String },

    /// Archive location could not be opened.
    #[error("invalid archive location {}: {reason}", location.display())]
    InvalidLocation { location: PathBuf, reason: String },

    /// Bytes were offered for a name that is already materialized.
    #[error("`{name}` is already loaded; refusing to replace its definition")]
    RedefinitionHazard { name: String },

    /// Artifact bytes do not describe the requested type.
    #[error("invalid artifact for `{name}`: {reason}")]
    InvalidArtifact { name: String, reason: String },

    /// The type has no `Default` constructor or is generic.
    #[error("`{0}` cannot be instantiated")]
    NotInstantiable(String),

    /// The type declares no operation with this name.
    #[error("`{type_name}` has no operation `{operation}`")]
    UnknownOperation { type_name: String, operation: String },

    /// The operation ran and failed (bad arguments, panic, missing receiver).
    #[error("`{type_name}::{operation}` failed: {message}")]
    Invocation {
        type_name: String,
        operation: String,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying in this process is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolchainUnavailable(_))
    }

    /// Compiler diagnostics carried by a [`Error::Compile`].
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Compile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_toolchain_errors_are_fatal() {
        assert!(Error::ToolchainUnavailable("rustc not found".into()).is_fatal());
        assert!(!Error::Resolution { name: "p::A".into() }.is_fatal());
        assert!(
            !Error::Compile {
                name: "p::A".into(),
                diagnostics: Vec::new()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_compile_error_exposes_diagnostics() {
        let err = Error::Compile {
            name: "p::A".into(),
            diagnostics: Diagnostic::simple("expected `}`"),
        };
        assert_eq!(err.diagnostics().len(), 1);
        assert_eq!(err.to_string(), "compilation of `p::A` failed with 1 diagnostic(s)");
        assert!(Error::Resolution { name: "x".into() }.diagnostics().is_empty());
    }
}
