//! Database connection pooling (§4.4).
//!
//! A Postgres pool sized from [`Config::db`] — the storage backend this
//! engine's `pgvector`-backed chunk tables require.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.db.min_connections)
        .max_connections(config.db.max_connections)
        .connect(&config.db.url)
        .await?;

    Ok(pool)
}
