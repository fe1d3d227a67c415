//! # dho-index
//!
//! **Ingests PDF documents into a semantic index and serves
//! vector-similarity search over them.**
//!
//! Generalized from a local-first, connector-driven ingestion framework:
//! where that framework pulls from filesystem/Git/S3 connectors and
//! indexes into SQLite FTS5 + brute-force cosine vectors, this crate has
//! exactly one source (PDF URLs) and one storage backend (Postgres +
//! `pgvector`), and trades hybrid keyword/semantic search for pure
//! vector search behind a small HTTP service.
//!
//! ## Architecture
//!
//! ```text
//! PDF URLs ──▶ fetch ──▶ extract ──▶ chunk ──▶ embed ──▶ Postgres/pgvector
//!                                                              │
//!                                    ┌─────────────────────────┤
//!                                    ▼                         ▼
//!                               CLI ingest               HTTP search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven configuration, refreshable global snapshot |
//! | [`models`] | Core data types: `Book`, `TextChunk`, `EmbeddedChunk`, `SearchResult` |
//! | [`error`] | The ingestion error taxonomy (`IngestError`) |
//! | [`chunk`] | Sentence-splitter and word-overlap chunking strategies |
//! | [`extract`] | PDF text and metadata extraction |
//! | [`embedding`] | Embedding provider trait, OpenAI/Ollama/dummy implementations |
//! | [`storage`] | The `Storage` trait and its Postgres+pgvector implementation |
//! | [`ingest`] | Single-book ingestion pipeline |
//! | [`orchestrator`] | Bounded-concurrency batch runner |
//! | [`progress`] | Batch ingestion progress reporting |
//! | [`search`] | The HTTP search service |
//! | [`db`] | Postgres connection pooling |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`logging`] | Structured logging init, driven by `LOG_LEVEL`/`LOG_FORMAT` |
//!
//! ## Configuration
//!
//! Configured entirely from process environment variables. See [`config`]
//! for all available variables and [`config::Config::load`] for validation
//! rules.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod search;
pub mod storage;
