//! Core data models shared across ingestion and search.
//!
//! These types mirror the `books` / `chunks` / `chunks_nomic` tables (§3,
//! §6) and the shapes returned to HTTP callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book row, keyed by its source URL.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Book {
    pub id: i64,
    pub pdf_url: String,
    pub title: String,
    pub author: String,
    pub pages: i32,
    pub samling: String,
    pub created_datetime: DateTime<Utc>,
}

/// A chunk ready to be embedded: its source page and text.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub page: i32,
    pub text: String,
}

/// A chunk with its computed embedding, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub page: i32,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Book metadata plus its chunks, as handed to `Storage::save_book_with_chunks`.
///
/// `provider`/`model` are stamped onto every chunk row for audit (§3: "Each
/// row also carries provider and model identifier strings") — one provider
/// table write is always for exactly one provider/model pair.
#[derive(Debug, Clone)]
pub struct BookWithChunks {
    pub pdf_url: String,
    pub title: String,
    pub author: String,
    pub pages: i32,
    pub samling: String,
    pub provider: String,
    pub model: String,
    pub chunks: Vec<EmbeddedChunk>,
}

/// A single row returned by a vector-distance scan, before grouping by book.
#[derive(Debug, Clone)]
pub struct SearchRow {
    pub book_id: i64,
    pub pdf_url: String,
    pub title: String,
    pub author: String,
    pub page: i32,
    pub chunk: String,
    pub distance: f64,
}

/// A grouped, book-level search result — the `POST /search` response shape.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub book_id: i64,
    pub pdf_url: String,
    pub pdf_url_with_page: String,
    pub titel: String,
    pub forfatter: String,
    pub sidenr: i32,
    pub chunk: String,
    pub distance: f64,
}

/// A single URL's ingestion outcome, recorded in `failed_books.json` on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBook {
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated result of a batch ingestion run (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub successful: u64,
    pub failed: u64,
    pub total: u64,
    pub failed_books: Vec<FailedBook>,
}

/// `processing_status.json` — written during a batch run so an external
/// wrapper can poll progress (§6).
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStatus {
    pub status: String,
    pub total_books: u64,
    pub processed: u64,
    pub failed: u64,
    pub last_updated: DateTime<Utc>,
    pub embedding_model: String,
    pub provider: String,
}
