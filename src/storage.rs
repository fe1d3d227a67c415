//! Persistence (§4.4).
//!
//! [`Storage`] is the trait the ingestion pipeline and search service depend
//! on; [`PgStorage`] is the Postgres+pgvector implementation used in
//! production, [`MemoryStorage`] an in-memory fake used by tests that would
//! otherwise need a live database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;

use crate::error::IngestError;
use crate::models::{Book, BookWithChunks, SearchRow};

/// Shared validation for a book that doesn't exist yet (§4.4): title/author
/// must be non-empty and pages must be positive. Used by both
/// `get_or_create_book`'s default impl and `save_book_with_chunks`, which
/// performs its own get-or-create under one transaction.
fn validate_new_book_metadata(pdf_url: &str, title: &str, author: &str, pages: i32) -> Result<(), IngestError> {
    if title.trim().is_empty() || author.trim().is_empty() || pages <= 0 {
        return Err(IngestError::Storage {
            cause: format!(
                "cannot create book {pdf_url}: title/author must be non-empty and pages > 0 \
                 (got title={title:?}, author={author:?}, pages={pages})"
            ),
        });
    }
    Ok(())
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_book_by_url(&self, pdf_url: &str) -> Result<Option<Book>, IngestError>;

    async fn create_book(
        &self,
        pdf_url: &str,
        title: &str,
        author: &str,
        pages: i32,
        samling: &str,
    ) -> Result<Book, IngestError>;

    /// Idempotent combination of the two calls above (§4.4). When the book
    /// does not exist yet, required metadata must be present — empty
    /// title/author or `pages <= 0` fails with a validation error rather than
    /// silently creating a useless row.
    async fn get_or_create_book(
        &self,
        pdf_url: &str,
        title: &str,
        author: &str,
        pages: i32,
        samling: &str,
    ) -> Result<Book, IngestError> {
        if let Some(book) = self.find_book_by_url(pdf_url).await? {
            return Ok(book);
        }
        validate_new_book_metadata(pdf_url, title, author, pages)?;
        self.create_book(pdf_url, title, author, pages, samling).await
    }

    async fn book_has_embeddings_for_provider(
        &self,
        book_id: i64,
        table: &str,
    ) -> Result<bool, IngestError>;

    /// Persist a book's chunks for one provider table in a single transaction
    /// (§4.4 P5: a book's chunk set for a provider is all-or-nothing).
    async fn save_book_with_chunks(
        &self,
        book: &BookWithChunks,
        table: &str,
    ) -> Result<i64, IngestError>;

    async fn search(
        &self,
        query_embedding: &[f32],
        table: &str,
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<SearchRow>, IngestError>;

    /// A cheap reachability probe for `GET /readyz` (§4.7).
    async fn ready_check(&self) -> Result<(), IngestError>;
}

// ============ Postgres ============

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn find_book_by_url(&self, pdf_url: &str) -> Result<Option<Book>, IngestError> {
        sqlx::query_as::<_, Book>(
            r#"SELECT id, pdf_url, title, author, pages, samling, created_datetime
               FROM books WHERE pdf_url = $1"#,
        )
        .bind(pdf_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::Storage { cause: e.to_string() })
    }

    async fn create_book(
        &self,
        pdf_url: &str,
        title: &str,
        author: &str,
        pages: i32,
        samling: &str,
    ) -> Result<Book, IngestError> {
        sqlx::query_as::<_, Book>(
            r#"INSERT INTO books (pdf_url, title, author, pages, samling)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (pdf_url) DO UPDATE SET pdf_url = EXCLUDED.pdf_url
               RETURNING id, pdf_url, title, author, pages, samling, created_datetime"#,
        )
        .bind(pdf_url)
        .bind(title)
        .bind(author)
        .bind(pages)
        .bind(samling)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IngestError::Storage { cause: e.to_string() })
    }

    async fn book_has_embeddings_for_provider(
        &self,
        book_id: i64,
        table: &str,
    ) -> Result<bool, IngestError> {
        // `table` always comes from `EmbeddingProvider::table_name()`, a fixed
        // &'static str per provider, never user input.
        let query = format!("SELECT COUNT(*) > 0 FROM {table} WHERE book_id = $1");
        sqlx::query_scalar::<_, bool>(&query)
            .bind(book_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::Storage { cause: e.to_string() })
    }

    async fn save_book_with_chunks(
        &self,
        book: &BookWithChunks,
        table: &str,
    ) -> Result<i64, IngestError> {
        if self.find_book_by_url(&book.pdf_url).await?.is_none() {
            validate_new_book_metadata(&book.pdf_url, &book.title, &book.author, book.pages)?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::Storage { cause: e.to_string() })?;

        let book_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO books (pdf_url, title, author, pages, samling)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (pdf_url) DO UPDATE SET pdf_url = EXCLUDED.pdf_url
               RETURNING id"#,
        )
        .bind(&book.pdf_url)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.pages)
        .bind(&book.samling)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| IngestError::Storage { cause: e.to_string() })?;

        let insert = format!(
            "INSERT INTO {table} (book_id, page, chunk, embedding, provider, model) VALUES ($1, $2, $3, $4, $5, $6)"
        );
        for chunk in &book.chunks {
            sqlx::query(&insert)
                .bind(book_id)
                .bind(chunk.page)
                .bind(&chunk.text)
                .bind(Vector::from(chunk.embedding.clone()))
                .bind(&book.provider)
                .bind(&book.model)
                .execute(&mut *tx)
                .await
                .map_err(|e| IngestError::Storage { cause: e.to_string() })?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::Storage { cause: e.to_string() })?;

        Ok(book_id)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        table: &str,
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<SearchRow>, IngestError> {
        let query = format!(
            r#"SELECT b.id AS book_id, b.pdf_url, b.title, b.author, c.page, c.chunk,
                      (c.embedding <=> $1) AS distance
               FROM {table} c
               JOIN books b ON b.id = c.book_id
               WHERE (c.embedding <=> $1) < $2
               ORDER BY c.embedding <=> $1
               LIMIT $3"#
        );

        let rows = sqlx::query_as::<_, (i64, String, String, String, i32, String, f64)>(&query)
            .bind(Vector::from(query_embedding.to_vec()))
            .bind(distance_threshold)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::Storage { cause: e.to_string() })?;

        Ok(rows
            .into_iter()
            .map(|(book_id, pdf_url, title, author, page, chunk, distance)| SearchRow {
                book_id,
                pdf_url,
                title,
                author,
                page,
                chunk,
                distance,
            })
            .collect())
    }

    async fn ready_check(&self) -> Result<(), IngestError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| IngestError::Storage { cause: e.to_string() })?;
        Ok(())
    }
}

// ============ In-memory fake ============

struct MemoryChunkRow {
    book_id: i64,
    page: i32,
    chunk: String,
    embedding: Vec<f32>,
}

/// Exercises ingestion/search logic without a live Postgres instance.
/// Partitions rows by provider table name the same way `PgStorage` partitions
/// by physical table.
pub struct MemoryStorage {
    books: Mutex<Vec<Book>>,
    chunks: Mutex<HashMap<String, Vec<MemoryChunkRow>>>,
    next_id: Mutex<i64>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            books: Mutex::new(Vec::new()),
            chunks: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - (dot / (norm_a * norm_b))) as f64
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_book_by_url(&self, pdf_url: &str) -> Result<Option<Book>, IngestError> {
        Ok(self
            .books
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.pdf_url == pdf_url)
            .cloned())
    }

    async fn create_book(
        &self,
        pdf_url: &str,
        title: &str,
        author: &str,
        pages: i32,
        samling: &str,
    ) -> Result<Book, IngestError> {
        let mut id_guard = self.next_id.lock().unwrap();
        let id = *id_guard;
        *id_guard += 1;
        let book = Book {
            id,
            pdf_url: pdf_url.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            pages,
            samling: samling.to_string(),
            created_datetime: chrono::Utc::now(),
        };
        self.books.lock().unwrap().push(book.clone());
        Ok(book)
    }

    async fn book_has_embeddings_for_provider(
        &self,
        book_id: i64,
        table: &str,
    ) -> Result<bool, IngestError> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.iter().any(|r| r.book_id == book_id))
            .unwrap_or(false))
    }

    async fn save_book_with_chunks(
        &self,
        book: &BookWithChunks,
        table: &str,
    ) -> Result<i64, IngestError> {
        let existing = self.find_book_by_url(&book.pdf_url).await?;
        let book_id = match existing {
            Some(b) => b.id,
            None => {
                validate_new_book_metadata(&book.pdf_url, &book.title, &book.author, book.pages)?;
                self.create_book(&book.pdf_url, &book.title, &book.author, book.pages, &book.samling)
                    .await?
                    .id
            }
        };

        let mut chunks = self.chunks.lock().unwrap();
        let rows = chunks.entry(table.to_string()).or_default();
        for chunk in &book.chunks {
            rows.push(MemoryChunkRow {
                book_id,
                page: chunk.page,
                chunk: chunk.text.clone(),
                embedding: chunk.embedding.clone(),
            });
        }
        Ok(book_id)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        table: &str,
        limit: usize,
        distance_threshold: f64,
    ) -> Result<Vec<SearchRow>, IngestError> {
        let chunks = self.chunks.lock().unwrap();
        let books = self.books.lock().unwrap();
        let Some(rows) = chunks.get(table) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<SearchRow> = rows
            .iter()
            .filter_map(|row| {
                let distance = cosine_distance(query_embedding, &row.embedding);
                if distance >= distance_threshold {
                    return None;
                }
                let book = books.iter().find(|b| b.id == row.book_id)?;
                Some(SearchRow {
                    book_id: row.book_id,
                    pdf_url: book.pdf_url.clone(),
                    title: book.title.clone(),
                    author: book.author.clone(),
                    page: row.page,
                    chunk: row.chunk.clone(),
                    distance,
                })
            })
            .collect();

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        scored.truncate(limit);
        Ok(scored)
    }

    async fn ready_check(&self) -> Result<(), IngestError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddedChunk;

    fn chunked_book(url: &str, vectors: Vec<Vec<f32>>) -> BookWithChunks {
        BookWithChunks {
            pdf_url: url.to_string(),
            title: "Title".to_string(),
            author: "Author".to_string(),
            pages: 1,
            samling: "default".to_string(),
            provider: "dummy".to_string(),
            model: "dummy".to_string(),
            chunks: vectors
                .into_iter()
                .enumerate()
                .map(|(i, embedding)| EmbeddedChunk {
                    page: (i + 1) as i32,
                    text: format!("chunk {i}"),
                    embedding,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let storage = MemoryStorage::default();
        let first = storage
            .get_or_create_book("https://x/a.pdf", "A", "Auth", 3, "default")
            .await
            .unwrap();
        let second = storage
            .get_or_create_book("https://x/a.pdf", "A", "Auth", 3, "default")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn search_respects_distance_threshold() {
        let storage = MemoryStorage::default();
        let book = chunked_book("https://x/a.pdf", vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        storage.save_book_with_chunks(&book, "chunks_dummy").await.unwrap();

        let results = storage
            .search(&[1.0, 0.0], "chunks_dummy", 10, 0.01)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page, 1);
    }

    #[tokio::test]
    async fn get_or_create_rejects_empty_title_for_new_book() {
        let storage = MemoryStorage::default();
        let result = storage
            .get_or_create_book("https://x/untitled.pdf", "", "Auth", 3, "default")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_or_create_rejects_nonpositive_pages_for_new_book() {
        let storage = MemoryStorage::default();
        let result = storage
            .get_or_create_book("https://x/empty.pdf", "Title", "Auth", 0, "default")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn save_book_with_chunks_rejects_invalid_metadata_for_new_book() {
        let storage = MemoryStorage::default();
        let mut book = chunked_book("https://x/bad.pdf", vec![vec![1.0, 0.0]]);
        book.title = String::new();
        let result = storage.save_book_with_chunks(&book, "chunks").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn book_has_embeddings_for_provider_is_table_scoped() {
        let storage = MemoryStorage::default();
        let book = chunked_book("https://x/a.pdf", vec![vec![1.0, 0.0]]);
        let book_id = storage.save_book_with_chunks(&book, "chunks").await.unwrap();

        assert!(storage
            .book_has_embeddings_for_provider(book_id, "chunks")
            .await
            .unwrap());
        assert!(!storage
            .book_has_embeddings_for_provider(book_id, "chunks_nomic")
            .await
            .unwrap());
    }
}
