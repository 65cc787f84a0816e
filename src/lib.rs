//! # World Cup RAG
//!
//! Retrieval-augmented question answering over FIFA World Cup history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │   CSV    │──▶│  Statements  │──▶│  Chunks   │──▶│  SQLite  │
//! │ datasets │   │ (templates)  │   │ S / M / L │   │  index   │
//! └──────────┘   └──────────────┘   └───────────┘   └────┬─────┘
//!                                                        │
//!                  ┌─────────────────────────────────────┤
//!                  ▼                                     ▼
//!          ┌───────────────┐                      ┌────────────┐
//!          │ quick answers │──▶ cache ──▶ MMR ──▶ │ LLM (+ t/o)│
//!          └───────────────┘                      └────────────┘
//! ```
//!
//! The pure pipeline pieces (materializer, chunker, index, retriever,
//! quick answers, cache, prompt) live in `worldcup-rag-core`. This crate
//! adds configuration, data loading, embedding and model backends,
//! persistence, the answer composer, and the HTTP and CLI surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`dataset`] | CSV loading |
//! | [`embedding`] | Embedding backends and fallback selection |
//! | [`llm`] | Language-model backends and fallback selection |
//! | [`builder`] | Offline index build |
//! | [`index_store`] | SQLite persistence of the index |
//! | [`db`] | Database connection |
//! | [`answer`] | The [`answer::Pipeline`] context and answer flow |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod builder;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embedding;
pub mod index_store;
pub mod llm;
pub mod server;
