//! TOML configuration with environment overrides.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. After parsing, a handful of deployment secrets and limits may be
//! overridden from the environment:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `PASSWORD_TO_ENTER` | `auth.password` |
//! | `OPENAI_MODEL_NAME` | `llm.model` |
//! | `EMBEDDINGS_MODEL` | `embedding.model` |
//! | `MAX_NUMBER_OF_FILES` | `upload.max_files` |
//! | `DATABASE_NAME` | file name of `db.path` |
//!
//! `OPENAI_API_KEY` is not part of the config; the providers read it when
//! they are constructed.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use clausewatch_core::chunk::{DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub content: ContentConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Labels shown on every page.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_author")]
    pub author: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            author: default_author(),
        }
    }
}

fn default_title() -> String {
    "ClauseWatch".to_string()
}
fn default_author() -> String {
    "ClauseWatch maintainers".to_string()
}

/// Static page bodies (markdown).
#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_home")]
    pub home: String,
    #[serde(default = "default_about")]
    pub about: String,
    #[serde(default = "default_methodology")]
    pub methodology: String,
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            about: default_about(),
            methodology: default_methodology(),
            disclaimer: default_disclaimer(),
        }
    }
}

fn default_home() -> String {
    "Upload tender documents into a repository, then scan them for conflicting clauses \
     or check a single clause against them."
        .to_string()
}
fn default_about() -> String {
    "ClauseWatch helps procurement teams spot contradictory clauses before a tender is issued."
        .to_string()
}
fn default_methodology() -> String {
    "Each selected file is split into overlapping passages of at most 500 tokens. The passages \
     are embedded into a temporary index, the most relevant ones are retrieved, and a chat \
     model compares them and reports any conflicts as a table."
        .to_string()
}
fn default_disclaimer() -> String {
    "Answers are generated by a language model and may be incomplete or wrong. Review every \
     reported conflict against the source documents. Do not upload confidential material you \
     are not permitted to share with the model provider."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
        }
    }
}

fn default_max_files() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

/// Where run-scoped collections live.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"sqlite"` (default) or `"memory"`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
    /// Defaults to `vector_store.sqlite` next to the main database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Run collections older than this are treated as abandoned and deleted
    /// before the next analysis.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            path: None,
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_seed")]
    pub seed: Option<i64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: 0.0,
            seed: default_seed(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            base_url: default_base_url(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_seed() -> Option<i64> {
    Some(42)
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Shared password. Logins are refused while this is unset.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Key for sealing session tokens. A random key is generated at startup
    /// when unset, which invalidates sessions on restart.
    #[serde(default)]
    pub session_secret: Option<String>,
    /// Seconds a session token stays valid after the last response.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Largest accepted request body. Uploads travel base64-encoded inside
    /// the JSON command, so this bounds the size of a repository upload.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_secret: None,
            session_ttl_secs: default_session_ttl_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_session_ttl_secs() -> u64 {
    crate::session::DEFAULT_SESSION_TTL_SECS
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

impl Config {
    /// Defaults everywhere, with the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            app: AppConfig::default(),
            content: ContentConfig::default(),
            db: DbConfig {
                path: PathBuf::from("./data/clausewatch.sqlite"),
            },
            upload: UploadConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Path of the vector-store database.
    pub fn index_path(&self) -> PathBuf {
        self.index
            .path
            .clone()
            .unwrap_or_else(|| self.db.path.with_file_name("vector_store.sqlite"))
    }

    /// Apply environment overrides through `lookup`, which is
    /// `std::env::var(..).ok()` outside of tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(password) = non_empty("PASSWORD_TO_ENTER") {
            self.auth.password = Some(password);
        }
        if let Some(model) = non_empty("OPENAI_MODEL_NAME") {
            self.llm.model = Some(model);
        }
        if let Some(model) = non_empty("EMBEDDINGS_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(raw) = non_empty("MAX_NUMBER_OF_FILES") {
            self.upload.max_files = raw
                .trim()
                .parse()
                .with_context(|| format!("MAX_NUMBER_OF_FILES is not a number: '{}'", raw))?;
        }
        if let Some(name) = non_empty("DATABASE_NAME") {
            self.db.path = self.db.path.with_file_name(name.trim());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
        }
        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.upload.max_files < 1 {
            bail!("upload.max_files must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }

        if self.server.session_ttl_secs == 0 {
            bail!("server.session_ttl_secs must be > 0");
        }
        if self.server.max_body_bytes == 0 {
            bail!("server.max_body_bytes must be > 0");
        }
        if self.index.stale_after_secs < 60 {
            bail!("index.stale_after_secs must be >= 60");
        }

        match self.index.backend.as_str() {
            "sqlite" | "memory" => {}
            other => bail!("Unknown index backend: '{}'. Must be sqlite or memory.", other),
        }

        for (section, provider, model) in [
            ("embedding", &self.embedding.provider, &self.embedding.model),
            ("llm", &self.llm.provider, &self.llm.model),
        ] {
            match provider.as_str() {
                "disabled" => {}
                "openai" => {
                    if model.as_deref().map_or(true, |m| m.trim().is_empty()) {
                        bail!("{}.model must be specified when provider is 'openai'", section);
                    }
                }
                other => bail!(
                    "Unknown {} provider: '{}'. Must be disabled or openai.",
                    section,
                    other
                ),
            }
        }
        Ok(())
    }
}

/// Parse config text, apply overrides from `lookup`, and validate.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_from_minimal_file() {
        let cfg = parse_config("[db]\npath = \"/tmp/cw/app.sqlite\"\n", no_env).unwrap();
        assert_eq!(cfg.chunking.max_tokens, 500);
        assert_eq!(cfg.chunking.overlap_tokens, 50);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.upload.max_files, 5);
        assert_eq!(cfg.llm.seed, Some(42));
        assert_eq!(cfg.llm.temperature, 0.0);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.index_path(), PathBuf::from("/tmp/cw/vector_store.sqlite"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PASSWORD_TO_ENTER", "s3cret"),
            ("OPENAI_MODEL_NAME", "gpt-4o-mini"),
            ("EMBEDDINGS_MODEL", "text-embedding-3-small"),
            ("MAX_NUMBER_OF_FILES", "3"),
            ("DATABASE_NAME", "tenders.sqlite"),
        ]
        .into_iter()
        .collect();
        let cfg = parse_config(
            "[db]\npath = \"/tmp/cw/app.sqlite\"\n[llm]\nprovider = \"openai\"\n",
            |k| env.get(k).map(|v| v.to_string()),
        )
        .unwrap();
        assert_eq!(cfg.auth.password.as_deref(), Some("s3cret"));
        assert_eq!(cfg.llm.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cfg.embedding.model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(cfg.upload.max_files, 3);
        assert_eq!(cfg.db.path, PathBuf::from("/tmp/cw/tenders.sqlite"));
    }

    #[test]
    fn test_bad_max_files_override() {
        let err = parse_config("[db]\npath = \"a.sqlite\"\n", |k| {
            (k == "MAX_NUMBER_OF_FILES").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("MAX_NUMBER_OF_FILES"));
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let toml = "[db]\npath = \"a.sqlite\"\n[chunking]\nmax_tokens = 50\noverlap_tokens = 50\n";
        assert!(parse_config(toml, no_env).is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let toml = "[db]\npath = \"a.sqlite\"\n[embedding]\nprovider = \"openai\"\n";
        let err = parse_config(toml, no_env).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_backend() {
        let toml = "[db]\npath = \"a.sqlite\"\n[index]\nbackend = \"chroma\"\n";
        assert!(parse_config(toml, no_env).is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/clausewatch.example.toml"), no_env).unwrap();
        assert_eq!(cfg.index.backend, "sqlite");
        assert_eq!(cfg.llm.seed, Some(42));
        assert_eq!(cfg.index_path(), PathBuf::from("./data/vector_store.sqlite"));
    }
}
