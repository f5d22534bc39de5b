//! # ClauseWatch Core
//!
//! Storage-agnostic logic shared by the ClauseWatch app: segment and chunk
//! models, token-bounded chunking, embedding and chat-model traits, the
//! vector index abstraction with its run-scoped lifecycle, and the prompt
//! templates used by the answer pipeline.
//!
//! This crate carries no sqlx, HTTP client, or filesystem I/O. Concrete
//! providers and the on-disk index live in the `clausewatch` app crate.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompt;
