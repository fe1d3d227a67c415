//! Schema migrations (§4.4).
//!
//! Creates the `books` table and one `chunks*` table per embedding provider
//! (`chunks` for OpenAI's 1536-dim vectors, `chunks_nomic` for Ollama's
//! 768-dim vectors, `chunks_dummy` for the test provider), each with an ANN
//! cosine index. Idempotent throughout — `CREATE TABLE IF NOT EXISTS` /
//! `CREATE INDEX IF NOT EXISTS` / `CREATE EXTENSION IF NOT EXISTS`.

use anyhow::Result;
use sqlx::PgPool;

use crate::embedding::EmbeddingProvider;

pub async fn run_migrations(pool: &PgPool, provider: &dyn EmbeddingProvider) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id BIGSERIAL PRIMARY KEY,
            pdf_url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            pages INTEGER NOT NULL DEFAULT 0,
            samling TEXT NOT NULL DEFAULT '',
            created_datetime TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_chunk_table(pool, provider.table_name(), provider.dimension()).await?;

    Ok(())
}

/// Bootstrap a single provider's chunk table + ANN index. Exposed separately
/// from [`run_migrations`] so every configured provider's table can be
/// created up front regardless of which provider is active at any given run
/// (§4.4: switching `PROVIDER` must not require a manual migration step).
pub async fn create_chunk_table(pool: &PgPool, table: &str, dims: usize) -> Result<()> {
    let create = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            book_id BIGINT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            page INTEGER NOT NULL,
            chunk TEXT NOT NULL,
            embedding vector({dims}) NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            created_datetime TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    );
    sqlx::query(&create).execute(pool).await?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS {table}_embedding_idx ON {table} \
         USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
    );
    sqlx::query(&index).execute(pool).await?;

    let book_index = format!("CREATE INDEX IF NOT EXISTS {table}_book_id_idx ON {table} (book_id)");
    sqlx::query(&book_index).execute(pool).await?;

    Ok(())
}
