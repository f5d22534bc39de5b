//! Similarity-search collections.
//!
//! The [`VectorIndex`] trait is the seam between the answer pipeline and a
//! concrete store. A collection is a named bag of chunk vectors that lives
//! for exactly one analysis run; see [`run::RunIndex`] for the lifecycle.
//!
//! Implementations must be `Send + Sync`.

pub mod memory;
pub mod run;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Names of all live collections, sorted.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Create an empty collection. Fails if the name is taken.
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Names of collections created at or before `cutoff` (unix seconds).
    async fn collections_created_before(&self, cutoff: i64) -> Result<Vec<String>>;

    /// Delete a collection and its entries. Returns `false` if it did not
    /// exist.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Append entries to an existing collection.
    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Top-`k` entries by cosine similarity to `vector`, best first.
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of entries in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

pub use memory::InMemoryIndex;
pub use run::{sweep_stale_runs, RunIndex, RunKind};
