//! On-disk [`VectorIndex`] backed by its own SQLite file.
//!
//! Vectors are stored as little-endian f32 BLOBs next to the chunk they were
//! computed from. Queries load the collection and rank it by brute-force
//! cosine similarity, which is adequate for the few hundred chunks a single
//! analysis run produces.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use clausewatch_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use clausewatch_core::index::{IndexEntry, InMemoryIndex, VectorIndex};
use clausewatch_core::models::{Chunk, ScoredChunk};

use crate::config::Config;
use crate::db;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (and if needed create) the vector store at `config.index_path()`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::open(&config.index_path()).await?;
        let index = Self { pool };
        index.migrate().await?;
        Ok(index)
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_entries (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                file_id INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                page INTEGER,
                chunk_index INTEGER NOT NULL,
                byte_offset INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_collection_entries_collection ON collection_entries(collection)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let inserted = sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if inserted == 0 {
            bail!("collection '{}' already exists", name);
        }
        Ok(())
    }

    async fn collections_created_before(&self, cutoff: i64) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM collections WHERE created_at <= ? ORDER BY name")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM collection_entries WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        if !self.exists(collection).await? {
            bail!("collection '{}' not found", collection);
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let c = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO collection_entries
                    (collection, chunk_id, file_id, file_name, page, chunk_index,
                     byte_offset, token_count, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&c.id)
            .bind(c.file_id)
            .bind(&c.file_name)
            .bind(c.page.map(i64::from))
            .bind(c.chunk_index)
            .bind(c.offset as i64)
            .bind(c.token_count as i64)
            .bind(&c.text)
            .bind(&c.hash)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if !self.exists(collection).await? {
            bail!("collection '{}' not found", collection);
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, file_id, file_name, page, chunk_index, byte_offset,
                   token_count, text, hash, embedding
            FROM collection_entries
            WHERE collection = ?
            ORDER BY entry_id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let page: Option<i64> = row.get("page");
                let offset: i64 = row.get("byte_offset");
                let token_count: i64 = row.get("token_count");
                ScoredChunk {
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    chunk: Chunk {
                        id: row.get("chunk_id"),
                        file_id: row.get("file_id"),
                        file_name: row.get("file_name"),
                        page: page.map(|p| p as u32),
                        chunk_index: row.get("chunk_index"),
                        offset: offset as usize,
                        token_count: token_count as usize,
                        text: row.get("text"),
                        hash: row.get("hash"),
                    },
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        if !self.exists(collection).await? {
            bail!("collection '{}' not found", collection);
        }
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

/// Build the index backend named by `index.backend`.
pub async fn open_index(config: &Config) -> Result<Box<dyn VectorIndex>> {
    match config.index.backend.as_str() {
        "memory" => Ok(Box::new(InMemoryIndex::new())),
        "sqlite" => Ok(Box::new(SqliteIndex::open(config).await?)),
        other => bail!("Unknown index backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn index() -> (TempDir, SqliteIndex) {
        let tmp = TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("vectors.sqlite")).await.unwrap();
        let index = SqliteIndex::with_pool(pool);
        index.migrate().await.unwrap();
        (tmp, index)
    }

    fn entry(i: i64, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: format!("chunk-{i}"),
                file_id: 3,
                file_name: "tender.pdf".into(),
                page: Some(2),
                chunk_index: i,
                offset: 10,
                token_count: 4,
                text: text.into(),
                hash: "h".into(),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn test_add_and_query_ranks() {
        let (_tmp, index) = index().await;
        index.create_collection("analyse-files-a").await.unwrap();
        index
            .add(
                "analyse-files-a",
                &[
                    entry(0, "east", vec![1.0, 0.0]),
                    entry(1, "north", vec![0.0, 1.0]),
                    entry(2, "diagonal", vec![0.6, 0.8]),
                ],
            )
            .await
            .unwrap();

        let hits = index.query("analyse-files-a", &[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "north");
        assert_eq!(hits[0].chunk.page, Some(2));
        assert_eq!(hits[0].chunk.file_name, "tender.pdf");
        assert_eq!(hits[1].chunk.text, "diagonal");
        assert_eq!(index.count("analyse-files-a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let (_tmp, index) = index().await;
        index.create_collection("a").await.unwrap();
        index.create_collection("b").await.unwrap();
        index.add("a", &[entry(0, "only in a", vec![1.0])]).await.unwrap();
        assert_eq!(index.count("b").await.unwrap(), 0);
        assert_eq!(index.list_collections().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_create_existing_and_delete() {
        let (_tmp, index) = index().await;
        index.create_collection("a").await.unwrap();
        assert!(index.create_collection("a").await.is_err());
        index.add("a", &[entry(0, "x", vec![1.0])]).await.unwrap();

        assert!(index.delete_collection("a").await.unwrap());
        assert!(!index.delete_collection("a").await.unwrap());
        assert!(index.add("a", &[entry(0, "x", vec![1.0])]).await.is_err());
        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_abandoned_run_is_swept_after_reopen() {
        use clausewatch_core::embedding::Embedder;
        use clausewatch_core::index::{sweep_stale_runs, RunIndex, RunKind};

        struct Ones;

        #[async_trait]
        impl Embedder for Ones {
            fn model_name(&self) -> &str {
                "ones"
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 1.0]).collect())
            }
        }

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.sqlite");
        {
            let index = SqliteIndex::with_pool(db::open(&path).await.unwrap());
            index.migrate().await.unwrap();
            let chunk = entry(0, "Payment within 30 days.", vec![1.0, 1.0]).chunk;
            let run = RunIndex::build(&index, &Ones, RunKind::AnalyseFiles.run_name(), &[chunk], 8)
                .await
                .unwrap();
            // Dropped without teardown, as when the process is killed mid-run.
            drop(run);
            assert_eq!(index.list_collections().await.unwrap().len(), 1);
            index.pool.close().await;
        }

        let index = SqliteIndex::with_pool(db::open(&path).await.unwrap());
        index.migrate().await.unwrap();
        assert_eq!(sweep_stale_runs(&index, 3600).await.unwrap(), 0);
        assert_eq!(sweep_stale_runs(&index, 0).await.unwrap(), 1);
        assert!(index.list_collections().await.unwrap().is_empty());
        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }
}
