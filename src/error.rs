//! Error taxonomy for the ingestion pipeline.
//!
//! Each variant tags a failure domain so that `failed_books[i].error` (§7)
//! always names a type and is never empty. These compose into `anyhow::Error`
//! at call sites rather than forming a `thiserror` derive tree — the crate
//! this one is built from reaches for `anyhow` everywhere, never `thiserror`.

use std::fmt;

/// A book-ingestion failure, tagged by the stage that raised it.
#[derive(Debug)]
pub enum IngestError {
    Fetch { url: String, cause: String },
    Parse { url: String, cause: String },
    Chunk { cause: String },
    Embed { cause: String },
    Storage { cause: String },
}

impl IngestError {
    /// The error kind as it appears in the `"kind: message"` rendering (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch { .. } => "FetchError",
            IngestError::Parse { .. } => "ParseError",
            IngestError::Chunk { .. } => "ChunkError",
            IngestError::Embed { .. } => "EmbedError",
            IngestError::Storage { .. } => "StorageError",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            IngestError::Fetch { url, cause } => format!("fetching {url}: {cause}"),
            IngestError::Parse { url, cause } => format!("parsing {url}: {cause}"),
            IngestError::Chunk { cause } => cause.clone(),
            IngestError::Embed { cause } => cause.clone(),
            IngestError::Storage { cause } => cause.clone(),
        };
        let message = if message.trim().is_empty() {
            "No details available".to_string()
        } else {
            message
        };
        write!(f, "{}: {}", self.kind(), message)
    }
}

impl std::error::Error for IngestError {}

/// Render any error as a non-empty `"type: message"` string (§7's fallback).
pub fn describe(err: &anyhow::Error) -> String {
    let msg = err.to_string();
    if msg.trim().is_empty() {
        format!("{}: No details available", type_name_of(err))
    } else {
        msg
    }
}

fn type_name_of(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<IngestError>() {
        Some(e) => e.kind(),
        None => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_empty() {
        let err = IngestError::Fetch {
            url: "https://x".into(),
            cause: String::new(),
        };
        let rendered = err.to_string();
        assert!(!rendered.trim().is_empty());
        assert!(rendered.starts_with("FetchError:"));
    }

    #[test]
    fn describe_wraps_anyhow() {
        let err: anyhow::Error = IngestError::Embed {
            cause: "timed out".into(),
        }
        .into();
        assert_eq!(describe(&err), "EmbedError: timed out");
    }
}
