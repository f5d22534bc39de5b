//! In-memory [`VectorIndex`] for tests and the `memory` backend.
//!
//! Collections are held in a `HashMap` behind `std::sync::RwLock`. Queries
//! are brute-force cosine similarity over every entry in the collection.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ScoredChunk;

use super::{IndexEntry, VectorIndex};

struct Collection {
    created_at: i64,
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(name) {
            bail!("collection '{}' already exists", name);
        }
        collections.insert(
            name.to_string(),
            Collection {
                created_at: chrono::Utc::now().timestamp(),
                entries: Vec::new(),
            },
        );
        Ok(())
    }

    async fn collections_created_before(&self, cutoff: i64) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.created_at <= cutoff)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.write().unwrap().remove(name).is_some())
    }

    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        match collections.get_mut(collection) {
            Some(stored) => {
                stored.entries.extend_from_slice(entries);
                Ok(())
            }
            None => bail!("collection '{}' not found", collection),
        }
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.read().unwrap();
        let Some(stored) = collections.get(collection) else {
            bail!("collection '{}' not found", collection);
        };

        let mut scored: Vec<ScoredChunk> = stored
            .entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        match self.collections.read().unwrap().get(collection) {
            Some(stored) => Ok(stored.entries.len()),
            None => bail!("collection '{}' not found", collection),
        }
    }
}
