//! Bounded-concurrency batch orchestrator (§5, §6 CLI contract).
//!
//! Runs [`ingest::ingest_book`] over a list of URLs with at most
//! `concurrency` books in flight at once, via a bounded worker pool
//! (`tokio::sync::Semaphore` gating `tokio::task::JoinSet` spawns).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::describe;
use crate::ingest::IngestDeps;
use crate::models::{FailedBook, ProcessingStatus, RunResult};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Run ingestion over every URL in `urls`, at most `concurrency` at a time.
/// Always completes the full list — one book's failure never cancels
/// others (§5 P-CONC: failures are isolated per book).
///
/// Equivalent to [`run_cancellable`] with a token that never fires.
pub async fn run(
    deps: Arc<IngestDeps>,
    urls: Vec<String>,
    concurrency: usize,
    reporter: Option<Arc<dyn IngestProgressReporter>>,
) -> RunResult {
    run_cancellable(deps, urls, concurrency, reporter, CancellationToken::new()).await
}

/// Cancellable variant of [`run`] (§5): once `cancel` fires, no new URL is
/// dispatched, but every worker already holding a semaphore permit runs to
/// completion (its own per-call timeouts still bound how long that takes).
/// `total` always reflects the requested URL count; a cancelled run's
/// `successful + failed` may be less than `total` when URLs remained
/// undispatched at cancellation.
pub async fn run_cancellable(
    deps: Arc<IngestDeps>,
    urls: Vec<String>,
    concurrency: usize,
    reporter: Option<Arc<dyn IngestProgressReporter>>,
    cancel: CancellationToken,
) -> RunResult {
    let reporter = reporter.unwrap_or_else(|| Arc::new(NoProgress));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let requested_total = urls.len() as u64;
    let processed = Arc::new(AtomicU64::new(0));

    let mut tasks = JoinSet::new();
    let mut dispatched = 0u64;

    for url in urls {
        if cancel.is_cancelled() {
            tracing::info!(dispatched, requested_total, "cancellation requested, stopping new dispatch");
            break;
        }
        dispatched += 1;

        let deps = Arc::clone(&deps);
        let semaphore = Arc::clone(&semaphore);
        let reporter = Arc::clone(&reporter);
        let processed = Arc::clone(&processed);

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = deps.ingest(&url).await;
            let n = processed.fetch_add(1, Ordering::SeqCst) + 1;

            match &result {
                Ok(()) => reporter.report(IngestProgressEvent::Processing {
                    url: url.clone(),
                    n,
                    total: requested_total,
                }),
                Err(e) => reporter.report(IngestProgressEvent::Failed {
                    url: url.clone(),
                    error: e.to_string(),
                    n,
                    total: requested_total,
                }),
            }

            (url, result)
        });
    }

    let mut successful = 0u64;
    let mut failed_books = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_url, Ok(()))) => successful += 1,
            Ok((url, Err(e))) => failed_books.push(FailedBook {
                url,
                error: e.to_string(),
                timestamp: Utc::now(),
            }),
            Err(join_err) => failed_books.push(FailedBook {
                url: "<unknown>".to_string(),
                error: describe(&anyhow::anyhow!(join_err)),
                timestamp: Utc::now(),
            }),
        }
    }

    RunResult {
        successful,
        failed: failed_books.len() as u64,
        total: requested_total,
        failed_books,
    }
}

/// Install a `SIGINT` handler that fires the returned token (§5's
/// cancellation signal), cancelling outstanding work via
/// `tokio_util::sync::CancellationToken` rather than a raw channel.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, stopping new work and waiting for in-flight books");
            child.cancel();
        }
    });
    token
}

/// Write `processing_status.json` (§6): the run's terminal summary.
pub fn write_processing_status(dir: &Path, config: &Config, result: &RunResult) -> anyhow::Result<()> {
    let status = ProcessingStatus {
        status: if result.failed == 0 { "completed" } else { "completed_with_errors" }.to_string(),
        total_books: result.total,
        processed: result.successful,
        failed: result.failed,
        last_updated: Utc::now(),
        embedding_model: config
            .openai
            .as_ref()
            .map(|o| o.model.clone())
            .or_else(|| config.ollama.as_ref().map(|o| o.model.clone()))
            .unwrap_or_else(|| "dummy".to_string()),
        provider: config.provider.tag().to_string(),
    };

    let path = dir.join("processing_status.json");
    std::fs::write(&path, serde_json::to_string_pretty(&status)?)?;
    Ok(())
}

/// Write `failed_books.json` (§6): the list of books that failed this run.
pub fn write_failed_books(dir: &Path, result: &RunResult) -> anyhow::Result<()> {
    let path = dir.join("failed_books.json");
    std::fs::write(&path, serde_json::to_string_pretty(&result.failed_books)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::DummyProvider;
    use crate::storage::MemoryStorage;
    use tempfile::tempdir;

    fn test_config() -> Config {
        std::env::set_var("PROVIDER", "dummy");
        let cfg = Config::load().unwrap();
        std::env::remove_var("PROVIDER");
        cfg
    }

    #[tokio::test]
    async fn run_isolates_per_book_failures() {
        let deps = Arc::new(IngestDeps {
            config: Arc::new(test_config()),
            provider: Arc::new(DummyProvider),
            storage: Arc::new(MemoryStorage::default()),
            client: reqwest::Client::new(),
            collection: "default".to_string(),
        });

        // Both URLs will fail the fetch step (no network in tests), but the
        // run must still process every URL and report both failures.
        let result = orchestrator_run_offline(deps).await;
        assert_eq!(result.total, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.successful, 0);
    }

    async fn orchestrator_run_offline(deps: Arc<IngestDeps>) -> RunResult {
        run(
            deps,
            vec![
                "https://invalid.invalid/a.pdf".to_string(),
                "https://invalid.invalid/b.pdf".to_string(),
            ],
            2,
            None,
        )
        .await
    }

    #[tokio::test]
    async fn cancelling_before_dispatch_stops_new_work() {
        let deps = Arc::new(IngestDeps {
            config: Arc::new(test_config()),
            provider: Arc::new(DummyProvider),
            storage: Arc::new(MemoryStorage::default()),
            client: reqwest::Client::new(),
            collection: "default".to_string(),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_cancellable(
            deps,
            vec!["https://invalid.invalid/a.pdf".to_string()],
            1,
            None,
            cancel,
        )
        .await;

        assert_eq!(result.total, 1);
        assert_eq!(result.successful + result.failed, 0);
    }

    #[test]
    fn write_processing_status_creates_file() {
        let dir = tempdir().unwrap();
        let cfg = test_config();
        let result = RunResult {
            successful: 3,
            failed: 0,
            total: 3,
            failed_books: vec![],
        };
        write_processing_status(dir.path(), &cfg, &result).unwrap();
        assert!(dir.path().join("processing_status.json").exists());
    }

    #[test]
    fn write_failed_books_creates_file() {
        let dir = tempdir().unwrap();
        let result = RunResult {
            successful: 0,
            failed: 1,
            total: 1,
            failed_books: vec![FailedBook {
                url: "https://x/a.pdf".to_string(),
                error: "FetchError: timeout".to_string(),
                timestamp: Utc::now(),
            }],
        };
        write_failed_books(dir.path(), &result).unwrap();
        assert!(dir.path().join("failed_books.json").exists());
    }
}
