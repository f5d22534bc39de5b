//! Run-scoped index lifecycle.
//!
//! Every analysis unit gets its own collection named `"{kind}-{uuid}"`.
//! The collection is built from scratch, queried, and deleted again, so no
//! two runs ever read or write the same collection. A run that dies before
//! teardown leaves its collection behind; [`sweep_stale_runs`] removes such
//! leftovers once they are older than any live run could be.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{embed_query, Embedder};
use crate::models::{Chunk, ScoredChunk};

use super::{IndexEntry, VectorIndex};

/// Which kind of analysis a run performs; used as the collection prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunKind {
    AnalyseFiles,
    CheckClause,
}

impl RunKind {
    pub fn slug(self) -> &'static str {
        match self {
            RunKind::AnalyseFiles => "analyse-files",
            RunKind::CheckClause => "check-clause",
        }
    }

    pub const ALL: [RunKind; 2] = [RunKind::AnalyseFiles, RunKind::CheckClause];

    /// A fresh, unique collection name for one run.
    pub fn run_name(self) -> String {
        format!("{}-{}", self.slug(), Uuid::new_v4().simple())
    }
}

/// Whether `name` looks like a collection created by [`RunKind::run_name`].
pub fn is_run_collection(name: &str) -> bool {
    RunKind::ALL.iter().any(|kind| {
        name.strip_prefix(kind.slug())
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|id| !id.is_empty())
    })
}

/// Delete run collections created at least `max_age_secs` ago.
///
/// Collections whose names do not come from [`RunKind::run_name`] are left
/// alone. Returns the number of collections removed.
pub async fn sweep_stale_runs(index: &dyn VectorIndex, max_age_secs: u64) -> Result<usize> {
    let cutoff = chrono::Utc::now().timestamp() - max_age_secs as i64;
    let mut removed = 0;
    for name in index.collections_created_before(cutoff).await? {
        if is_run_collection(&name) && index.delete_collection(&name).await? {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, "deleted stale run collections");
    }
    Ok(removed)
}

/// A populated collection owned by one run.
///
/// Call [`RunIndex::teardown`] when done; the pipeline does so on both the
/// success and the failure path.
pub struct RunIndex<'a> {
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    name: String,
    len: usize,
}

impl<'a> RunIndex<'a> {
    /// Create the collection `name` and fill it with embedded `chunks`.
    ///
    /// A leftover collection with the same name is deleted first. If
    /// embedding or insertion fails the partially built collection is
    /// removed before the error is returned.
    pub async fn build(
        index: &'a dyn VectorIndex,
        embedder: &'a dyn Embedder,
        name: String,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> Result<RunIndex<'a>> {
        if index.delete_collection(&name).await? {
            tracing::debug!(collection = %name, "deleted stale collection");
        }
        index.create_collection(&name).await?;

        let mut run = RunIndex {
            index,
            embedder,
            name,
            len: 0,
        };
        match run.fill(chunks, batch_size.max(1)).await {
            Ok(()) => Ok(run),
            Err(e) => {
                if let Err(te) = run.teardown().await {
                    tracing::warn!(error = %te, "failed to remove partial collection");
                }
                Err(e)
            }
        }
    }

    async fn fill(&mut self, chunks: &[Chunk], batch_size: usize) -> Result<()> {
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }
            let entries: Vec<IndexEntry> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry { chunk, vector })
                .collect();
            self.index.add(&self.name, &entries).await?;
            self.len += entries.len();
        }
        tracing::debug!(collection = %self.name, entries = self.len, "collection built");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Embed `query` and return the `k` most similar chunks.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = embed_query(self.embedder, query).await?;
        self.index.query(&self.name, &vector, k).await
    }

    pub async fn teardown(self) -> Result<()> {
        self.index.delete_collection(&self.name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use async_trait::async_trait;

    struct Letters;

    #[async_trait]
    impl Embedder for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    vec![
                        lower.matches("payment").count() as f32,
                        lower.matches("delivery").count() as f32,
                        1.0,
                    ]
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("provider unavailable")
        }
    }

    fn chunk(i: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("c{i}"),
            file_id: 1,
            file_name: "a.txt".to_string(),
            page: None,
            chunk_index: i,
            offset: 0,
            token_count: 1,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_run_names_are_unique_and_prefixed() {
        let a = RunKind::AnalyseFiles.run_name();
        let b = RunKind::AnalyseFiles.run_name();
        assert_ne!(a, b);
        assert!(a.starts_with("analyse-files-"));
        assert!(RunKind::CheckClause.run_name().starts_with("check-clause-"));
    }

    #[tokio::test]
    async fn test_build_retrieve_teardown() {
        let index = InMemoryIndex::new();
        let chunks = vec![
            chunk(0, "Payment due in 30 days."),
            chunk(1, "Delivery within two weeks."),
            chunk(2, "Payment shall be made in 60 days."),
        ];
        let run = RunIndex::build(&index, &Letters, "analyse-files-x".into(), &chunks, 2)
            .await
            .unwrap();
        assert_eq!(run.len(), 3);
        assert_eq!(index.count("analyse-files-x").await.unwrap(), 3);

        let hits = run.retrieve("payment terms", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.text.contains("Payment")));

        run.teardown().await.unwrap();
        assert!(index.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_replaces_same_name_collection() {
        let index = InMemoryIndex::new();
        index.create_collection("check-clause-x").await.unwrap();
        let run = RunIndex::build(&index, &Letters, "check-clause-x".into(), &[chunk(0, "a")], 8)
            .await
            .unwrap();
        assert_eq!(index.count("check-clause-x").await.unwrap(), 1);
        run.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_build_leaves_no_collection() {
        let index = InMemoryIndex::new();
        let result = RunIndex::build(&index, &Broken, "analyse-files-y".into(), &[chunk(0, "a")], 8).await;
        assert!(result.is_err());
        assert!(index.list_collections().await.unwrap().is_empty());
    }

    #[test]
    fn test_run_collection_names() {
        assert!(is_run_collection(&RunKind::AnalyseFiles.run_name()));
        assert!(is_run_collection("check-clause-abc"));
        assert!(!is_run_collection("check-clause-"));
        assert!(!is_run_collection("analyse-filesx"));
        assert!(!is_run_collection("notes"));
    }

    #[tokio::test]
    async fn test_abandoned_run_is_swept() {
        let index = InMemoryIndex::new();
        index.create_collection("notes").await.unwrap();
        let name = RunKind::CheckClause.run_name();
        let run = RunIndex::build(&index, &Letters, name.clone(), &[chunk(0, "a")], 8)
            .await
            .unwrap();
        drop(run);

        // Too young to be swept.
        assert_eq!(sweep_stale_runs(&index, 3600).await.unwrap(), 0);
        assert_eq!(index.list_collections().await.unwrap(), vec![name, "notes".to_string()]);

        assert_eq!(sweep_stale_runs(&index, 0).await.unwrap(), 1);
        assert_eq!(index.list_collections().await.unwrap(), vec!["notes"]);
    }
}
