// Error types for the fallible edges of the library: loading and saving
// levels and configuration.
//
// Navigation outcomes are deliberately NOT errors. "No path", an unresolved
// anchor, an exhausted search budget, a stale node handle, and every build
// diagnostic are ordinary return values (`Option`, `SearchOutcome`,
// `BuildReport`). Only I/O and data-format problems surface as `NavError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unknown nav point label: {label}")]
    UnknownLabel { label: String },

    #[error("Duplicate nav point label: {label}")]
    DuplicateLabel { label: String },

    #[error("Invalid level data: {reason}")]
    InvalidLevel { reason: String },
}

impl NavError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type NavResult<T> = Result<T, NavError>;
