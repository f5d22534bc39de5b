//! Answer pipeline: selected files in, one model answer per unit out.
//!
//! For every unit (each file on its own, or all selected files together in
//! combined scope) the pipeline:
//!
//! 1. Loads the stored bytes into segments ([`crate::extract`]).
//! 2. Chunks the segments ([`Chunker`]).
//! 3. Builds a fresh run-scoped collection under a unique name
//!    ([`RunIndex`]).
//! 4. Retrieves the top-k chunks for the mode's question.
//! 5. Renders the prompt and asks the chat model once.
//! 6. Tears the collection down and reports the result immediately.
//!
//! Units run strictly one after another. A malformed file fails only its
//! own unit; an unsupported content type aborts the rest of the run before
//! any index state is written for it.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use clausewatch_core::chunk::{Chunker, Tokenizer};
use clausewatch_core::embedding::Embedder;
use clausewatch_core::index::{sweep_stale_runs, RunIndex, RunKind, VectorIndex};
use clausewatch_core::llm::ChatModel;
use clausewatch_core::models::{Chunk, Segment};
use clausewatch_core::prompt::{PromptKind, CONFLICT_SCAN_QUESTION};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{StateError, ValidationError};
use crate::extract::{load_segments, LoadError};
use crate::llm::create_chat_model;
use crate::models::FileMeta;
use crate::progress::{AnalysisEvent, AnalysisReporter};
use crate::repository::BlobStore;
use crate::vector_store::open_index;

/// Model used to pick a tokenizer when `llm.model` is unset.
const FALLBACK_TOKENIZER_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Compare every clause within the selected files with each other.
    ConflictScan,
    /// Compare one user-supplied clause against the selected files.
    ClauseCheck { clause: String },
}

impl AnalysisMode {
    pub fn run_kind(&self) -> RunKind {
        match self {
            AnalysisMode::ConflictScan => RunKind::AnalyseFiles,
            AnalysisMode::ClauseCheck { .. } => RunKind::CheckClause,
        }
    }

    fn prompt_kind(&self) -> PromptKind {
        match self {
            AnalysisMode::ConflictScan => PromptKind::ConflictScan,
            AnalysisMode::ClauseCheck { .. } => PromptKind::ClauseCheck,
        }
    }

    fn question(&self) -> &str {
        match self {
            AnalysisMode::ConflictScan => CONFLICT_SCAN_QUESTION,
            AnalysisMode::ClauseCheck { clause } => clause.trim(),
        }
    }
}

/// Whether to analyse each file separately or all files in one index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisScope {
    #[default]
    PerFile,
    Combined,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub repository_id: String,
    /// Processed in this order; duplicates are ignored.
    pub file_ids: Vec<i64>,
    pub mode: AnalysisMode,
    pub scope: AnalysisScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Answered { answer: String },
    Failed { error: String },
}

/// The result of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    /// 1-based position in the run.
    pub position: usize,
    /// File name, or the comma-joined names in combined scope.
    pub label: String,
    pub file_ids: Vec<i64>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub kind: RunKind,
    pub scope: AnalysisScope,
    pub results: Vec<FileResult>,
    /// Set when an unsupported file stopped the run early.
    pub aborted: Option<String>,
}

enum UnitError {
    /// Stops the whole run.
    Abort(String),
    /// Fails only this unit.
    Fail(String),
}

/// Everything the pipeline needs besides the blob store.
pub struct Analyser {
    chunker: Chunker,
    index: Box<dyn VectorIndex>,
    embedder: Box<dyn Embedder>,
    chat: Box<dyn ChatModel>,
    top_k: usize,
    batch_size: usize,
    stale_after_secs: u64,
}

impl Analyser {
    pub fn new(
        chunker: Chunker,
        index: Box<dyn VectorIndex>,
        embedder: Box<dyn Embedder>,
        chat: Box<dyn ChatModel>,
    ) -> Self {
        Self {
            chunker,
            index,
            embedder,
            chat,
            top_k: 4,
            batch_size: 64,
            stale_after_secs: 3600,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after_secs = secs;
        self
    }

    /// Wire up the configured tokenizer, index backend, and providers.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let model = config.llm.model.as_deref().unwrap_or(FALLBACK_TOKENIZER_MODEL);
        let tokenizer = Tokenizer::for_model(model)?;
        let chunker = Chunker::new(tokenizer, config.chunking.max_tokens, config.chunking.overlap_tokens)?;
        let index = open_index(config).await?;
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.llm)?;
        Ok(Self::new(chunker, index, embedder, chat)
            .with_top_k(config.retrieval.top_k)
            .with_batch_size(config.embedding.batch_size)
            .with_stale_after(config.index.stale_after_secs))
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Run an analysis, reporting each unit's result as it completes.
    ///
    /// Errors are returned only for invalid requests (no files, blank
    /// clause, unknown repository or file) and storage failures; model and
    /// content problems are recorded per unit in the report.
    pub async fn run(
        &self,
        store: &BlobStore,
        request: &AnalysisRequest,
        reporter: &dyn AnalysisReporter,
    ) -> Result<AnalysisReport> {
        if let AnalysisMode::ClauseCheck { clause } = &request.mode {
            if clause.trim().is_empty() {
                return Err(ValidationError::EmptyClause.into());
            }
        }
        let files = self.resolve_files(store, request).await?;

        if let Err(e) = sweep_stale_runs(self.index.as_ref(), self.stale_after_secs).await {
            tracing::warn!(error = %e, "failed to sweep stale run collections");
        }

        let units: Vec<Vec<FileMeta>> = match request.scope {
            AnalysisScope::PerFile => files.into_iter().map(|f| vec![f]).collect(),
            AnalysisScope::Combined => vec![files],
        };
        let total = units.len();
        let kind = request.mode.run_kind();

        tracing::info!(
            kind = kind.slug(),
            repository_id = %request.repository_id,
            units = total,
            scope = ?request.scope,
            "analysis started"
        );
        reporter.report(AnalysisEvent::Started { kind, units: total });

        let mut report = AnalysisReport {
            kind,
            scope: request.scope,
            results: Vec::with_capacity(total),
            aborted: None,
        };

        for (i, unit) in units.iter().enumerate() {
            let position = i + 1;
            let label = unit.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ");
            reporter.report(AnalysisEvent::UnitStarted {
                position,
                total,
                label: &label,
            });

            let outcome = match self.analyse_unit(store, unit, &request.mode).await {
                Ok(answer) => Outcome::Answered { answer },
                Err(UnitError::Fail(error)) => {
                    tracing::warn!(position, label = %label, error = %error, "unit failed");
                    Outcome::Failed { error }
                }
                Err(UnitError::Abort(reason)) => {
                    tracing::warn!(position, label = %label, reason = %reason, "analysis aborted");
                    reporter.report(AnalysisEvent::Aborted { reason: &reason });
                    report.aborted = Some(reason);
                    break;
                }
            };

            let result = FileResult {
                position,
                label,
                file_ids: unit.iter().map(|f| f.id).collect(),
                outcome,
            };
            reporter.report(AnalysisEvent::UnitFinished {
                total,
                result: &result,
            });
            report.results.push(result);
        }

        tracing::info!(
            kind = kind.slug(),
            results = report.results.len(),
            aborted = report.aborted.is_some(),
            "analysis finished"
        );
        Ok(report)
    }

    /// Check the selection against the repository and return it in request
    /// order without duplicates.
    async fn resolve_files(&self, store: &BlobStore, request: &AnalysisRequest) -> Result<Vec<FileMeta>> {
        if request.file_ids.is_empty() {
            return Err(ValidationError::NoFilesSelected.into());
        }
        if store.get(&request.repository_id).await?.is_none() {
            return Err(StateError::RepositoryNotFound(request.repository_id.clone()).into());
        }
        let available = store.list_files(&request.repository_id).await?;

        let mut selected: Vec<FileMeta> = Vec::new();
        for &id in &request.file_ids {
            if selected.iter().any(|f| f.id == id) {
                continue;
            }
            match available.iter().find(|f| f.id == id) {
                Some(meta) => selected.push(meta.clone()),
                None => {
                    return Err(match store.get_file(id).await? {
                        Some(_) => StateError::FileNotInRepository {
                            file_id: id,
                            repository_id: request.repository_id.clone(),
                        },
                        None => StateError::FileNotFound(id),
                    }
                    .into())
                }
            }
        }
        Ok(selected)
    }

    async fn analyse_unit(
        &self,
        store: &BlobStore,
        unit: &[FileMeta],
        mode: &AnalysisMode,
    ) -> Result<String, UnitError> {
        let mut segments: Vec<Segment> = Vec::new();
        for meta in unit {
            let file = store
                .get_file(meta.id)
                .await
                .map_err(|e| UnitError::Fail(format!("{e:#}")))?
                .ok_or_else(|| UnitError::Fail(StateError::FileNotFound(meta.id).to_string()))?;
            match load_segments(&file) {
                Ok(loaded) => segments.extend(loaded),
                Err(e @ LoadError::UnsupportedType(_)) => {
                    return Err(UnitError::Abort(format!("{}: {}", meta.name, e)))
                }
                Err(e) => return Err(UnitError::Fail(format!("{}: {}", meta.name, e))),
            }
        }

        let chunks: Vec<Chunk> = self.chunker.chunks(&segments).collect();
        tracing::debug!(segments = segments.len(), chunks = chunks.len(), "unit chunked");
        if chunks.is_empty() {
            return Err(UnitError::Fail("no extractable text found".to_string()));
        }

        self.answer(mode, &chunks)
            .await
            .map_err(|e| UnitError::Fail(format!("{e:#}")))
    }

    async fn answer(&self, mode: &AnalysisMode, chunks: &[Chunk]) -> Result<String> {
        let run = RunIndex::build(
            self.index.as_ref(),
            self.embedder.as_ref(),
            mode.run_kind().run_name(),
            chunks,
            self.batch_size,
        )
        .await?;
        tracing::debug!(collection = run.name(), entries = run.len(), "run index ready");

        let answer = self.ask(&run, mode).await;
        if let Err(e) = run.teardown().await {
            tracing::warn!(error = %e, "failed to delete run collection");
        }
        answer
    }

    async fn ask(&self, run: &RunIndex<'_>, mode: &AnalysisMode) -> Result<String> {
        let question = mode.question();
        let hits = run.retrieve(question, self.top_k).await?;
        if hits.is_empty() {
            return Err(anyhow!("retrieval returned no passages"));
        }
        let prompt = mode.prompt_kind().render(&hits, question);
        self.chat.complete(&prompt).await
    }
}
