//! Batch ingestion progress reporting (§6 CLI contract).
//!
//! Reports observable progress during `dho-index ingest` so operators see
//! which book is being processed, how much is left, and can pipe JSON
//! progress into another tool. Progress is emitted on **stderr** so stdout
//! stays parseable for scripts.

use std::io::Write;

/// A single progress event for a batch ingestion run.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Currently fetching/parsing/chunking/embedding this book (no totals yet).
    Processing { url: String, n: u64, total: u64 },
    /// This book failed; `n`/`total` track overall run progress.
    Failed { url: String, error: String, n: u64, total: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  1,234 / 5,000  https://...".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Processing { url, n, total } => {
                format!("ingest  {} / {}  {}\n", format_number(*n), format_number(*total), url)
            }
            IngestProgressEvent::Failed { url, error, n, total } => {
                format!(
                    "ingest  {} / {}  FAILED  {}  ({})\n",
                    format_number(*n),
                    format_number(*total),
                    url,
                    error
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Processing { url, n, total } => serde_json::json!({
                "event": "progress",
                "url": url,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Failed { url, error, n, total } => serde_json::json!({
                "event": "failed",
                "url": url,
                "error": error,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
