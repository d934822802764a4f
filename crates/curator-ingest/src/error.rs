//! Error types for the ingest pipeline.

use std::path::PathBuf;

use curator_core::error::CuratorError;

/// Errors from characterizing a file.
#[derive(Debug, thiserror::Error)]
pub enum CharacterizationError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("File is empty: {0}")]
    Empty(PathBuf),
    #[error("Unrecognized format: {0}")]
    Unrecognized(PathBuf),
}

/// Errors from a single derivative recipe.
#[derive(Debug, thiserror::Error)]
pub enum DerivativeError {
    #[error("Recipe {recipe} failed: {message}")]
    RecipeFailed { recipe: String, message: String },
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the actor, the orchestrator and the job queue.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Staged file {path} unusable: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Persistence failure: {0}")]
    Persistence(String),
    #[error("Characterization failed: {0}")]
    Characterization(#[from] CharacterizationError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Derivative failed: {0}")]
    Derivative(#[from] DerivativeError),
    #[error("Enqueue failed: {0}")]
    Enqueue(String),
    #[error("Store error: {0}")]
    Store(CuratorError),
}

impl From<CuratorError> for IngestError {
    fn from(err: CuratorError) -> Self {
        match err {
            CuratorError::NotFound(what) => IngestError::NotFound(what),
            CuratorError::Persistence(what) => IngestError::Persistence(what),
            other => IngestError::Store(other),
        }
    }
}

impl IngestError {
    /// Wrap an I/O failure on a staged or working file.
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Staging {
            path: path.into(),
            source,
        }
    }
}
