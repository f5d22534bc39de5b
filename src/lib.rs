//! # ClauseWatch
//!
//! Flag conflicting contractual clauses in tender documents.
//!
//! Users upload `.docx`, `.pdf`, and `.txt` files into named repositories,
//! then either scan the selected files for clauses that contradict each
//! other or check one clause of their own against them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Blob store  │──▶│ Load + Chunk │──▶│ Run-scoped    │
//! │  (SQLite)    │   │              │   │ vector index  │
//! └──────────────┘   └──────────────┘   └───────┬───────┘
//!                                               │ top-k
//!                                               ▼
//!        ┌──────────┐   ┌──────────┐    ┌──────────────┐
//!        │   CLI    │──▶│ Dispatch │──▶│  Chat model  │
//!        │   HTTP   │   │ + gate   │    │  (answer)    │
//!        └──────────┘   └──────────┘    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cw init
//! cw --accept-disclaimer repo create --name TenderA tender.pdf
//! cw --accept-disclaimer analyse <repository-id>
//! cw serve
//! ```
//!
//! Chunking, the vector-index trait, prompts, and the provider traits live
//! in the `clausewatch-core` crate; this crate holds storage, providers,
//! the pipeline, and both surfaces.

pub mod analyse;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod progress;
pub mod repository;
pub mod server;
pub mod session;
pub mod status;
pub mod upload;
pub mod vector_store;
