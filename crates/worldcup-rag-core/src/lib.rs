//! # World Cup RAG Core
//!
//! Shared, I/O-free logic for the World Cup question-answering pipeline:
//! the data model, fact materialization, multi-granularity chunking, the
//! embedding and generation traits, the vector index, retrieval, quick
//! answers, the response cache, and prompt handling.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Concrete
//! embedding and language-model backends, persistence, and serving live in
//! the `worldcup-rag` application crate.
//!
//! ## Data Flow
//!
//! ```text
//! Record ──▶ materialize ──▶ Statement ──▶ chunk_all ──▶ Chunk
//!                                                         │ embed (batches)
//!                                                         ▼
//!                                    VectorIndex ◀── merge(partial)
//!                                         │
//! query ──▶ QuickAnswers ──▶ ResponseCache ──▶ retrieve ──▶ prompt ──▶ TextGenerator
//! ```

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod materialize;
pub mod models;
pub mod prompt;
pub mod quick;
pub mod retrieve;
pub mod select;
