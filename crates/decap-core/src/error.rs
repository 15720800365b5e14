//! Error types for Decap.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("ref {git_ref} is not managed on project {project}")]
    RefNotManaged { project: String, git_ref: String },

    #[error("lock held: {0}")]
    LockHeld(String),

    #[error("pod creation failed: {0}")]
    PodCreationFailed(String),

    #[error("pod deletion failed: {0}")]
    PodDeletionFailed(String),

    #[error("watch stream error: {0}")]
    WatchStream(String),

    #[error("storage error for {context}: {message}")]
    Storage { context: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a backing-store failure with the key it concerned.
    pub fn storage(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Storage {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
