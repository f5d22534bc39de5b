//! Install date, version, and storage summary.
//!
//! Backs `cw status` and the "since" tag shown on every page.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::migrate::SETUP_ON_KEY;

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    /// Install date as `YYYY-MM-DD`, from the `setup_on` configuration row.
    pub since: Option<String>,
    pub repositories: i64,
    pub files: i64,
    pub stored_bytes: i64,
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub async fn since(pool: &SqlitePool) -> Result<Option<String>> {
    let ts: Option<i64> = sqlx::query_scalar("SELECT created_at FROM configuration WHERE key = ?")
        .bind(SETUP_ON_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(ts.map(format_date))
}

pub async fn collect(pool: &SqlitePool) -> Result<Status> {
    let repositories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repository")
        .fetch_one(pool)
        .await?;
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(pool)
        .await?;
    let stored_bytes: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files")
        .fetch_one(pool)
        .await?;

    Ok(Status {
        version: version(),
        since: since(pool).await?,
        repositories,
        files,
        stored_bytes,
    })
}

/// Print the status summary for `cw status`.
pub fn print_status(config: &Config, status: &Status) {
    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    println!("{} v{}", config.app.title, status.version);
    println!("{}", "=".repeat(config.app.title.len() + status.version.len() + 2));
    println!();
    println!("  Since:         {}", status.since.as_deref().unwrap_or("not initialized"));
    println!("  Database:      {} ({})", config.db.path.display(), format_bytes(db_size));
    println!("  Vector store:  {} ({})", config.index_path().display(), config.index.backend);
    println!();
    println!("  Repositories:  {}", status.repositories);
    println!("  Files:         {}", status.files);
    println!("  Stored:        {}", format_bytes(status.stored_bytes.max(0) as u64));
    println!();
    println!("  Embeddings:    {}", config.embedding.model.as_deref().unwrap_or(&config.embedding.provider));
    println!("  Chat model:    {}", config.llm.model.as_deref().unwrap_or(&config.llm.provider));
    println!();
}

pub fn format_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::migrate;

    #[test]
    fn bytes_and_dates() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_date(0), "1970-01-01");
    }

    #[tokio::test]
    async fn since_is_set_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("app.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();
        let first = since(&pool).await.unwrap();
        assert!(first.is_some());

        sqlx::query("UPDATE configuration SET created_at = 0 WHERE key = ?")
            .bind(SETUP_ON_KEY)
            .execute(&pool)
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        assert_eq!(since(&pool).await.unwrap().as_deref(), Some("1970-01-01"));

        let status = collect(&pool).await.unwrap();
        assert_eq!(status.repositories, 0);
        assert_eq!(status.stored_bytes, 0);
    }
}
