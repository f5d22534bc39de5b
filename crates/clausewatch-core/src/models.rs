//! Data shapes passed between the loader, chunker, and index.

use serde::{Deserialize, Serialize};

/// One unit of loader output: a page of a PDF, or a whole Word or text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub file_id: i64,
    pub file_name: String,
    /// 1-based page number for paginated sources.
    pub page: Option<u32>,
    pub text: String,
}

impl Segment {
    pub fn new(file_id: i64, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_id,
            file_name: file_name.into(),
            page: None,
            text: text.into(),
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A token-bounded passage of a segment.
///
/// Chunks only live for the duration of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Random UUID, unique within a run.
    pub id: String,
    pub file_id: i64,
    pub file_name: String,
    pub page: Option<u32>,
    /// Position within the originating file, contiguous from 0.
    pub chunk_index: i64,
    /// Byte offset of `text` within its segment.
    pub offset: usize,
    pub token_count: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by a similarity query, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
