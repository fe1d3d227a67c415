//! Single-book ingestion pipeline (§4.5).
//!
//! Fetch → extract → (skip page 1 if multi-page) → chunk → embed → persist.
//! Each step is a named pipeline stage over one book, so the orchestrator
//! can run many of these concurrently (§5).

use std::sync::Arc;

use crate::chunk::{self, skip_first_page};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::IngestError;
use crate::extract;
use crate::models::{BookWithChunks, EmbeddedChunk};
use crate::storage::Storage;

/// Ingest one book end-to-end. Returns `Ok(())` once the book's chunks for
/// the active provider are durably persisted (§4.4 P5), or the first
/// [`IngestError`] encountered, tagged by stage (§7).
pub async fn ingest_book(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    storage: &dyn Storage,
    client: &reqwest::Client,
    pdf_url: &str,
    collection: &str,
) -> Result<(), IngestError> {
    if let Some(book) = storage.find_book_by_url(pdf_url).await? {
        if storage
            .book_has_embeddings_for_provider(book.id, provider.table_name())
            .await?
        {
            tracing::info!(pdf_url, "already ingested for this provider, skipping");
            return Ok(());
        }
    }

    let bytes = fetch(client, pdf_url).await?;

    let fallback_title = title_from_url(pdf_url);
    let extracted = extract::extract_book(&bytes, &fallback_title).map_err(|e| IngestError::Parse {
        url: pdf_url.to_string(),
        cause: e.to_string(),
    })?;

    let pages = skip_first_page(&extracted.pages);

    let strategy = chunk::strategy_from_kind(config.chunking_strategy);
    let text_chunks = strategy.chunk(&pages, config.chunk_size, &extracted.title)?;

    let mut embedded = Vec::with_capacity(text_chunks.len());
    for text_chunk in text_chunks {
        let vector = provider.embed(&text_chunk.text).await?;
        embedded.push(EmbeddedChunk {
            page: text_chunk.page,
            text: text_chunk.text,
            embedding: vector,
        });
    }

    // Storage rejects an empty author on book creation (§4.4); PDFs
    // routinely lack an /Author entry, so fall back rather than abort.
    let author = if extracted.author.is_empty() {
        "Unknown".to_string()
    } else {
        extracted.author
    };

    let book = BookWithChunks {
        pdf_url: pdf_url.to_string(),
        title: extracted.title,
        author,
        pages: extracted.page_count,
        samling: collection.to_string(),
        provider: provider.name().to_string(),
        model: provider.model_name(),
        chunks: embedded,
    };

    storage.save_book_with_chunks(&book, provider.table_name()).await?;

    Ok(())
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, IngestError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| IngestError::Fetch {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

    if !resp.status().is_success() {
        return Err(IngestError::Fetch {
            url: url.to_string(),
            cause: format!("HTTP {}", resp.status()),
        });
    }

    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| IngestError::Fetch {
            url: url.to_string(),
            cause: e.to_string(),
        })
}

fn title_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".pdf")
        .replace(['_', '-'], " ")
        .to_string()
}

/// Shared dependencies an orchestrator worker needs for one book (Arc'd so
/// many workers can share a single provider/storage/client).
pub struct IngestDeps {
    pub config: Arc<Config>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub storage: Arc<dyn Storage>,
    pub client: reqwest::Client,
    /// The `samling` tag stamped onto every book created by this run (§3).
    /// One collection per batch run — the external CLI wrapper is expected to
    /// invoke the binary once per collection when ingesting several.
    pub collection: String,
}

impl IngestDeps {
    pub async fn ingest(&self, pdf_url: &str) -> Result<(), IngestError> {
        ingest_book(
            &self.config,
            self.provider.as_ref(),
            self.storage.as_ref(),
            &self.client,
            pdf_url,
            &self.collection,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_url_strips_extension_and_underscores() {
        assert_eq!(title_from_url("https://x/archive/my_old_book.pdf"), "my old book");
    }

    #[test]
    fn title_from_url_falls_back_to_whole_url_without_slash() {
        assert_eq!(title_from_url("book.pdf"), "book");
    }
}
