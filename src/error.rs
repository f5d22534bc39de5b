//! Typed errors the dispatcher can classify.
//!
//! Everything is carried as `anyhow::Error`; the dispatcher downcasts to
//! these to decide between an inline warning, the generic "Something went
//! wrong" alert, and a full error report.

use thiserror::Error;

/// Bad user input. Shown inline; only the current action is aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Repository name must not be empty.")]
    EmptyName,
    #[error("Repository name must be at most {max} characters (got {len}).")]
    NameTooLong { len: usize, max: usize },
    #[error("Upload at least one file.")]
    NoFiles,
    #[error("Unsupported file type for '{0}'. Only .docx, .pdf and .txt files are accepted.")]
    UnsupportedUpload(String),
    #[error("Upload '{0}' is not valid base64.")]
    InvalidUpload(String),
    #[error("Enter the clause to check.")]
    EmptyClause,
    #[error("Select at least one file.")]
    NoFilesSelected,
    #[error("Tick the confirmation box to delete repositories.")]
    DeleteNotConfirmed,
    #[error("Select at least one repository.")]
    NoRepositoriesSelected,
}

/// Session or lookup state that should have been present but was not.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("no repository selected")]
    NoRepositorySelected,
    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),
    #[error("file {0} not found")]
    FileNotFound(i64),
    #[error("file {file_id} does not belong to repository '{repository_id}'")]
    FileNotInRepository { file_id: i64, repository_id: String },
}
