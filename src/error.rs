use std::path::PathBuf;

use thiserror::Error;

/// Result type for global pipeline stages.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that abort a run.
///
/// These indicate deterministic input defects or an unwritable output location; they are
/// never retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("naming collision: raw entities {first} and {second} both canonicalize to {path}")]
    NamingCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("entity id {id} is defined by both {first_file} and {second_file}")]
    DuplicateEntityId {
        id: String,
        first_file: String,
        second_file: String,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable extractor output under {}", .0.display())]
    NoInput(PathBuf),
}

/// A single file (or raw document) that could not be used. Isolated, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize)]
#[error("{origin}: {reason}")]
pub struct ExtractionFailure {
    /// Source file path or raw document path the failure applies to.
    pub origin: String,
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}
