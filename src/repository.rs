//! Blob store: repositories and their uploaded files.
//!
//! A repository is written together with all of its files in one
//! transaction, so a failed save leaves the database untouched. There is
//! no update path; repositories are only ever created or deleted.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{FileMeta, NewFile, Repository, RepositorySummary, StoredFile};

/// Longest accepted repository name, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Trim a user-typed name and cut it to [`MAX_NAME_CHARS`] characters, the
/// way the upload form does before saving.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().chars().take(MAX_NAME_CHARS).collect()
}

fn validate(name: &str, files: &[NewFile]) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = trimmed.chars().count();
    if len > MAX_NAME_CHARS {
        return Err(ValidationError::NameTooLong {
            len,
            max: MAX_NAME_CHARS,
        });
    }
    if files.is_empty() {
        return Err(ValidationError::NoFiles);
    }
    Ok(())
}

#[derive(Clone)]
pub struct BlobStore {
    pool: SqlitePool,
}

impl BlobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a repository holding `files`.
    ///
    /// Fails with a [`ValidationError`] before touching the database if the
    /// trimmed name is empty or too long, or if `files` is empty.
    pub async fn save(&self, name: &str, files: &[NewFile]) -> Result<Repository> {
        validate(name, files)?;

        let now = chrono::Utc::now().timestamp();
        let repo = Repository {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO repository (repository_id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&repo.id)
        .bind(&repo.name)
        .bind(repo.created_at)
        .bind(repo.updated_at)
        .execute(&mut *tx)
        .await?;

        for file in files {
            sqlx::query(
                "INSERT INTO files (repository_id, file_name, mime_type, size, data) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&repo.id)
            .bind(&file.name)
            .bind(&file.mime_type)
            .bind(file.content.len() as i64)
            .bind(&file.content)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(repository_id = %repo.id, name = %repo.name, files = files.len(), "repository saved");
        Ok(repo)
    }

    /// All repositories, newest first, with their file names joined by `", "`.
    pub async fn list(&self) -> Result<Vec<RepositorySummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.repository_id, r.name, r.created_at,
                   COUNT(f.file_id) AS file_count,
                   COALESCE(group_concat(f.file_name, ', '), '') AS file_names
            FROM repository r
            LEFT JOIN (SELECT file_id, repository_id, file_name FROM files ORDER BY file_name ASC) f
                ON f.repository_id = r.repository_id
            GROUP BY r.repository_id
            ORDER BY r.created_at DESC, r.rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RepositorySummary {
                id: row.get("repository_id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                file_count: row.get("file_count"),
                file_names: row.get("file_names"),
            })
            .collect())
    }

    pub async fn get(&self, repository_id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(
            "SELECT repository_id, name, created_at, updated_at FROM repository WHERE repository_id = ?",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Repository {
            id: row.get("repository_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// File metadata of one repository, ordered by name.
    pub async fn list_files(&self, repository_id: &str) -> Result<Vec<FileMeta>> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, repository_id, file_name, mime_type, size
            FROM files
            WHERE repository_id = ?
            ORDER BY file_name ASC, file_id ASC
            "#,
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(file_meta).collect())
    }

    pub async fn get_file(&self, file_id: i64) -> Result<Option<StoredFile>> {
        let row = sqlx::query(
            "SELECT file_id, repository_id, file_name, mime_type, size, data FROM files WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredFile {
            meta: file_meta(&row),
            content: row.get("data"),
        }))
    }

    /// Delete a repository and all of its files. Returns `false` if no such
    /// repository existed.
    pub async fn delete(&self, repository_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let files = sqlx::query("DELETE FROM files WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let repos = sqlx::query("DELETE FROM repository WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if repos > 0 {
            tracing::info!(repository_id, files, "repository deleted");
        }
        Ok(repos > 0)
    }
}

fn file_meta(row: &sqlx::sqlite::SqliteRow) -> FileMeta {
    FileMeta {
        id: row.get("file_id"),
        repository_id: row.get("repository_id"),
        name: row.get("file_name"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::migrate;
    use tempfile::TempDir;

    async fn store() -> (TempDir, BlobStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("app.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();
        (tmp, BlobStore::new(pool))
    }

    fn file(name: &str, body: &str) -> NewFile {
        NewFile {
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            content: body.as_bytes().to_vec(),
        }
    }

    async fn row_counts(store: &BlobStore) -> (i64, i64) {
        let repos: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repository")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(store.pool())
            .await
            .unwrap();
        (repos, files)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  TenderA  "), "TenderA");
        assert_eq!(normalize_name(&"é".repeat(150)).chars().count(), 100);
    }

    #[tokio::test]
    async fn test_save_and_list_roundtrip() {
        let (_tmp, store) = store().await;
        let repo = store
            .save(
                "TenderA",
                &[file("b.txt", "second"), file("a.txt", "first file")],
            )
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, repo.id);
        assert_eq!(listed[0].file_count, 2);
        assert_eq!(listed[0].file_names, "a.txt, b.txt");

        let files = store.list_files(&repo.id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 10);
        assert_eq!(files[1].size, 6);

        let stored = store.get_file(files[0].id).await.unwrap().unwrap();
        assert_eq!(stored.content, b"first file");
    }

    #[tokio::test]
    async fn test_invalid_saves_leave_storage_unchanged() {
        let (_tmp, store) = store().await;
        store.save("Existing", &[file("a.txt", "x")]).await.unwrap();

        let long = "n".repeat(101);
        let cases: Vec<(&str, Vec<NewFile>, ValidationError)> = vec![
            ("   ", vec![file("a.txt", "x")], ValidationError::EmptyName),
            (
                long.as_str(),
                vec![file("a.txt", "x")],
                ValidationError::NameTooLong { len: 101, max: 100 },
            ),
            ("NoFiles", vec![], ValidationError::NoFiles),
        ];
        for (name, files, expected) in cases {
            let err = store.save(name, &files).await.unwrap_err();
            assert_eq!(err.downcast_ref::<ValidationError>(), Some(&expected));
            assert_eq!(row_counts(&store).await, (1, 1));
        }
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (_tmp, store) = store().await;
        let first = store.save("First", &[file("a.txt", "x")]).await.unwrap();
        let second = store.save("Second", &[file("a.txt", "x")]).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_tmp, store) = store().await;
        let keep = store.save("Keep", &[file("k.txt", "k")]).await.unwrap();
        let gone = store
            .save("Gone", &[file("a.txt", "a"), file("b.txt", "b")])
            .await
            .unwrap();

        assert!(store.delete(&gone.id).await.unwrap());
        assert!(store.get(&gone.id).await.unwrap().is_none());
        assert!(store.list_files(&gone.id).await.unwrap().is_empty());
        assert_eq!(row_counts(&store).await, (1, 1));
        assert!(store.get(&keep.id).await.unwrap().is_some());

        assert!(!store.delete(&gone.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_key_cascade_on_raw_delete() {
        let (_tmp, store) = store().await;
        let repo = store.save("Raw", &[file("a.txt", "a")]).await.unwrap();
        sqlx::query("DELETE FROM repository WHERE repository_id = ?")
            .bind(&repo.id)
            .execute(store.pool())
            .await
            .unwrap();
        assert_eq!(row_counts(&store).await, (0, 0));
    }
}
