//! Rows of the main database and the upload shape that creates them.

use serde::Serialize;

/// A user-named grouping of uploaded files.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A repository as listed: with its file names joined by `", "`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RepositorySummary {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub file_count: i64,
    pub file_names: String,
}

/// File metadata without the content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileMeta {
    pub id: i64,
    pub repository_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub meta: FileMeta,
    pub content: Vec<u8>,
}

/// A file as received from an upload surface.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}
