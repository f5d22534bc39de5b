//! Token-bounded text chunker.
//!
//! Splits loaded [`Segment`]s into overlapping [`Chunk`]s whose size is
//! measured in tokens of the chat model that will eventually read them.
//!
//! # Algorithm
//!
//! Splitting is delegated to `text-splitter`, which descends through
//! semantic levels until a piece fits the token budget:
//!
//! 1. Paragraph breaks (runs of two or more newlines).
//! 2. Single line breaks.
//! 3. Sentence and word boundaries.
//! 4. Grapheme and character boundaries.
//!
//! Adjacent pieces are merged back up to the budget, and consecutive chunks
//! share up to `overlap_tokens` tokens of trailing context.
//!
//! # Example
//!
//! ```rust
//! use clausewatch_core::chunk::{Chunker, Tokenizer};
//! use clausewatch_core::models::Segment;
//!
//! let chunker = Chunker::new(Tokenizer::for_model("gpt-4o-mini").unwrap(), 500, 50).unwrap();
//! let segments = vec![Segment::new(1, "a.txt", "Hello world.\n\nSecond paragraph.")];
//! let chunks: Vec<_> = chunker.chunks(&segments).collect();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};
use text_splitter::{ChunkConfig, TextSplitter};
use tiktoken_rs::CoreBPE;
use uuid::Uuid;

use crate::models::{Chunk, Segment};

/// Default passage size in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 500;
/// Default overlap between consecutive passages, in tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;

/// BPE tokenizer resolved from a chat model name.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: CoreBPE,
    encoding: &'static str,
}

impl Tokenizer {
    /// Resolve the tokenizer a model uses, falling back to `cl100k_base`
    /// for names tiktoken does not recognise.
    pub fn for_model(model: &str) -> Result<Self> {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Ok(Self {
                bpe,
                encoding: "model",
            }),
            Err(e) => {
                tracing::debug!(model, error = %e, "unknown model, using cl100k_base");
                Self::cl100k()
            }
        }
    }

    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| anyhow!("failed to load cl100k_base: {e}"))?;
        Ok(Self {
            bpe,
            encoding: "cl100k_base",
        })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Which encoding was loaded: `"model"` or `"cl100k_base"`.
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }
}

/// Splits segments into overlapping, token-bounded chunks.
pub struct Chunker {
    splitter: TextSplitter<CoreBPE>,
    tokenizer: Tokenizer,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(tokenizer: Tokenizer, max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            bail!("chunk size must be greater than zero");
        }
        if overlap_tokens >= max_tokens {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap_tokens,
                max_tokens
            );
        }
        let config = ChunkConfig::new(max_tokens)
            .with_sizer(tokenizer.bpe.clone())
            .with_overlap(overlap_tokens)
            .map_err(|e| anyhow!("invalid chunk config: {e}"))?;
        Ok(Self {
            splitter: TextSplitter::new(config),
            tokenizer,
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Lazily chunk `segments` in source order.
    ///
    /// The iterator is finite, and calling `chunks` again restarts it from
    /// the first segment. `chunk_index` restarts at 0 whenever the file id
    /// changes, so indices are contiguous per file even across PDF pages.
    pub fn chunks<'a>(&'a self, segments: &'a [Segment]) -> impl Iterator<Item = Chunk> + 'a {
        segments
            .iter()
            .flat_map(move |segment| {
                self.splitter
                    .chunk_indices(&segment.text)
                    .map(move |(offset, text)| (segment, offset, text))
            })
            .scan(None::<(i64, i64)>, move |cursor, (segment, offset, text)| {
                let index = match cursor {
                    Some((file_id, next)) if *file_id == segment.file_id => *next,
                    _ => 0,
                };
                *cursor = Some((segment.file_id, index + 1));
                Some(self.make_chunk(segment, index, offset, text))
            })
    }

    fn make_chunk(&self, segment: &Segment, index: i64, offset: usize, text: &str) -> Chunk {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Chunk {
            id: Uuid::new_v4().to_string(),
            file_id: segment.file_id,
            file_name: segment.file_name.clone(),
            page: segment.page,
            chunk_index: index,
            offset,
            token_count: self.tokenizer.count(text),
            text: text.to_string(),
            hash: hex::encode(hasher.finalize()),
        }
    }
}
