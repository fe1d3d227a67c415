//! Embedding provider abstraction and implementations (§4.2).
//!
//! Three variants (OpenAI, Ollama, a deterministic dummy for tests) are
//! dispatched from one place — `provider_from_config` — rather than
//! branching on the provider string throughout the codebase.
//!
//! Each variant owns a fixed provider table name and dimension so storage can
//! route without branching on provider identity.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{Config, EmbeddingRuntimeConfig, ProviderKind};
use crate::error::IngestError;

/// Read the live embedding runtime parameters off the global config
/// snapshot (§4.1 `Refresh()`): a provider must observe a refreshed
/// timeout/retries/backoff on its very next call, not the values frozen at
/// construction.
fn live_runtime() -> Result<EmbeddingRuntimeConfig, IngestError> {
    crate::config::get()
        .map(|cfg| cfg.embedding_runtime.clone())
        .map_err(|e| IngestError::Embed { cause: e.to_string() })
}

/// `Embed(text) -> vector`, plus the metadata storage needs to route writes.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError>;

    /// The provider tag used for audit columns (e.g. `"openai"`).
    fn name(&self) -> &'static str;

    /// The model identifier used for audit columns (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> String;

    /// The per-provider chunk table this provider writes to (§3, §4.2).
    fn table_name(&self) -> &'static str;

    /// The embedding vector dimensionality of [`Self::table_name`].
    fn dimension(&self) -> usize;

    /// A cheap readiness probe for `GET /readyz` (§4.7). Never a paid call.
    async fn ready_check(&self) -> Result<(), IngestError>;
}

/// Construct the configured provider (§9: the only place that inspects
/// `PROVIDER`).
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::Openai => {
            let openai = config
                .openai
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("PROVIDER=openai requires OPENAI_API_KEY/OPENAI_MODEL"))?;
            Ok(Box::new(OpenAiProvider {
                client: reqwest::Client::new(),
                api_key: openai.api_key.clone(),
                model: openai.model.clone(),
            }))
        }
        ProviderKind::Ollama => {
            let ollama = config
                .ollama
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("PROVIDER=ollama requires OLLAMA_MODEL"))?;
            Ok(Box::new(OllamaProvider {
                client: reqwest::Client::new(),
                base_url: ollama.base_url.clone(),
                model: ollama.model.clone(),
            }))
        }
        ProviderKind::Dummy => Ok(Box::new(DummyProvider)),
    }
}

/// Retry a fallible async operation with exponential backoff (§4.2): the
/// first retry waits `backoff` seconds, each subsequent retry doubles the
/// delay. `max_retries` is attempts *beyond* the first. On exhaustion the
/// final attempt's error is returned, always rendered non-empty.
async fn with_retry<F, Fut>(
    runtime: &EmbeddingRuntimeConfig,
    op_name: &str,
    mut attempt: F,
) -> Result<Vec<f32>, IngestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<f32>, IngestError>>,
{
    let mut last_err: Option<IngestError> = None;

    for i in 0..=runtime.max_retries {
        if i > 0 {
            let delay = runtime.retry_backoff_secs.saturating_mul(1u64 << (i - 1).min(16));
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let call = attempt();
        match tokio::time::timeout(Duration::from_secs(runtime.timeout_secs), call).await {
            Ok(Ok(vec)) => return Ok(vec),
            Ok(Err(e)) => {
                tracing::warn!(op = op_name, attempt = i, error = %e, "embedding attempt failed");
                last_err = Some(e);
            }
            Err(_) => {
                tracing::warn!(op = op_name, attempt = i, "embedding attempt timed out");
                last_err = Some(IngestError::Embed {
                    cause: format!("{op_name} timed out after {}s", runtime.timeout_secs),
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| IngestError::Embed {
        cause: "No details available".to_string(),
    }))
}

// ============ OpenAI ============

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let text = text.to_string();
        let runtime = live_runtime()?;
        with_retry(&runtime, "openai.embed", || {
            let client = self.client.clone();
            let api_key = self.api_key.clone();
            let model = self.model.clone();
            let text = text.clone();
            async move {
                let resp = client
                    .post("https://api.openai.com/v1/embeddings")
                    .bearer_auth(api_key)
                    .json(&json!({ "model": model, "input": text }))
                    .send()
                    .await
                    .map_err(|e| IngestError::Embed { cause: e.to_string() })?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(IngestError::Embed {
                        cause: format!("OpenAI API error {status}: {body}"),
                    });
                }

                let json: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| IngestError::Embed { cause: e.to_string() })?;

                parse_embedding(&json)
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn table_name(&self) -> &'static str {
        "chunks"
    }

    fn dimension(&self) -> usize {
        1536
    }

    async fn ready_check(&self) -> Result<(), IngestError> {
        // Assumed ready — no paid call (§4.7).
        Ok(())
    }
}

fn parse_embedding(json: &serde_json::Value) -> Result<Vec<f32>, IngestError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| IngestError::Embed {
            cause: "invalid embedding response: missing data[0].embedding".to_string(),
        })?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Ollama ============

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<Vec<f32>, IngestError> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .json(&json!({ "model": self.model, "prompt": prompt }))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| IngestError::Embed { cause: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Embed {
                cause: format!("Ollama API error {status}: {body}"),
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| IngestError::Embed { cause: e.to_string() })?;

        json.get("embedding")
            .and_then(|e| e.as_array())
            .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
            .ok_or_else(|| IngestError::Embed {
                cause: "invalid embedding response: missing 'embedding'".to_string(),
            })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let text = text.to_string();
        let runtime = live_runtime()?;
        let timeout = Duration::from_secs(runtime.timeout_secs);
        with_retry(&runtime, "ollama.embed", || self.call(&text, timeout)).await
    }

    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn table_name(&self) -> &'static str {
        "chunks_nomic"
    }

    fn dimension(&self) -> usize {
        768
    }

    async fn ready_check(&self) -> Result<(), IngestError> {
        self.call("ping", Duration::from_secs(5)).await.map(|_| ())
    }
}

// ============ Dummy ============

/// Deterministic provider used by tests and admin-disabled environments.
pub struct DummyProvider;

#[async_trait]
impl EmbeddingProvider for DummyProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        Ok(deterministic_vector(text, 16))
    }

    fn name(&self) -> &'static str {
        "dummy"
    }

    fn model_name(&self) -> String {
        "dummy".to_string()
    }

    fn table_name(&self) -> &'static str {
        "chunks_dummy"
    }

    fn dimension(&self) -> usize {
        16
    }

    async fn ready_check(&self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Seed a fixed-length vector deterministically from `text`'s bytes.
fn deterministic_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut seed: u64 = 1469598103934665603; // FNV offset basis
    for byte in text.as_bytes() {
        seed ^= *byte as u64;
        seed = seed.wrapping_mul(1099511628211); // FNV prime
    }
    (0..dims)
        .map(|i| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407 + i as u64);
            ((seed >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dummy_is_deterministic() {
        let a = DummyProvider.embed("hello world").await.unwrap();
        let b = DummyProvider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn dummy_differs_by_text() {
        let a = DummyProvider.embed("hello").await.unwrap();
        let b = DummyProvider.embed("goodbye").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_embedding_extracts_vector() {
        let json = json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] });
        let vec = parse_embedding(&json).unwrap();
        assert_eq!(vec, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn parse_embedding_rejects_missing_field() {
        let json = json!({ "data": [] });
        assert!(parse_embedding(&json).is_err());
    }
}
