//! Chunking strategies (§4.3).
//!
//! Splits a book's per-page text into embedding-sized chunks. Two strategies
//! are provided: [`SentenceSplitter`] (per-page, title-prefixed, sentence-
//! bounded) and [`WordOverlap`] (cross-page, fixed 400-word windows with a
//! 50-word overlap). Both implement [`ChunkingStrategy`].
//!
//! Chunk text is always a plain `String` — the type system rules out the
//! "defensive downstream join" pattern outright. The one place a chunker can
//! still fail is emitting an empty chunk, which is rejected as a
//! [`IngestError::Chunk`] rather than silently produced (§7's "chunking type
//! violation" is fatal to the book, never patched up downstream).

use std::collections::BTreeMap;

use crate::config::ChunkingStrategyKind;
use crate::error::IngestError;
use crate::models::TextChunk;

/// A deterministic function from pages + title to a sequence of (page, text).
pub trait ChunkingStrategy: Send + Sync {
    fn chunk(
        &self,
        pages: &BTreeMap<i32, String>,
        max_tokens: usize,
        title: &str,
    ) -> Result<Vec<TextChunk>, IngestError>;
}

/// Remove page 1 from a multi-page document (§4.3.c). Single-page documents
/// are unaffected; remaining page numbers are never renumbered.
pub fn skip_first_page(pages: &BTreeMap<i32, String>) -> BTreeMap<i32, String> {
    if pages.len() <= 1 {
        return pages.clone();
    }
    pages
        .iter()
        .filter(|(page, _)| **page != 1)
        .map(|(page, text)| (*page, text.clone()))
        .collect()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn push_chunk(out: &mut Vec<TextChunk>, page: i32, text: String) -> Result<(), IngestError> {
    if text.trim().is_empty() {
        return Err(IngestError::Chunk {
            cause: "chunking strategy produced an empty chunk".to_string(),
        });
    }
    out.push(TextChunk { page, text });
    Ok(())
}

/// Split sentences at `.`, `!`, `?` followed by whitespace (or end of text).
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch == '.' || ch == '!' || ch == '?' {
            let next_is_boundary = match chars.peek() {
                Some((_, next_ch)) => next_ch.is_whitespace(),
                None => true,
            };
            if next_is_boundary {
                let end = idx + ch.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }
    if start < bytes.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// Hard-split a single sentence that alone exceeds `max_tokens`, at word
/// boundaries. No overlap is applied here (§4.3.a).
fn hard_split_sentence(sentence: &str, max_tokens: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    if max_tokens == 0 {
        return vec![sentence.to_string()];
    }
    words
        .chunks(max_tokens)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Per-page, title-prefixed, sentence-bounded chunker (§4.3.a, the default).
pub struct SentenceSplitter;

impl ChunkingStrategy for SentenceSplitter {
    fn chunk(
        &self,
        pages: &BTreeMap<i32, String>,
        max_tokens: usize,
        title: &str,
    ) -> Result<Vec<TextChunk>, IngestError> {
        let mut out = Vec::new();
        let prefix = format!("##{title}##");

        for (&page, text) in pages.iter() {
            let sentences = split_sentences(text);
            let mut current: Vec<String> = Vec::new();
            let mut current_words = 0usize;

            for sentence in sentences {
                let sentence_words = word_count(sentence);

                if sentence_words > max_tokens {
                    if !current.is_empty() {
                        push_chunk(&mut out, page, format!("{prefix} {}", current.join(" ")))?;
                        current.clear();
                        current_words = 0;
                    }
                    for piece in hard_split_sentence(sentence, max_tokens) {
                        push_chunk(&mut out, page, format!("{prefix} {piece}"))?;
                    }
                    continue;
                }

                if current_words + sentence_words > max_tokens && !current.is_empty() {
                    push_chunk(&mut out, page, format!("{prefix} {}", current.join(" ")))?;
                    current.clear();
                    current_words = 0;
                }

                current.push(sentence.to_string());
                current_words += sentence_words;
            }

            if !current.is_empty() {
                push_chunk(&mut out, page, format!("{prefix} {}", current.join(" ")))?;
            }
        }

        Ok(out)
    }
}

const WORD_OVERLAP_WINDOW: usize = 400;
const WORD_OVERLAP_STRIDE: usize = 350;

/// Cross-page, fixed 400-word windows with 50-word overlap (§4.3.b).
/// `max_tokens` is ignored — this is a fixed-geometry windowing.
pub struct WordOverlap;

impl ChunkingStrategy for WordOverlap {
    fn chunk(
        &self,
        pages: &BTreeMap<i32, String>,
        _max_tokens: usize,
        _title: &str,
    ) -> Result<Vec<TextChunk>, IngestError> {
        let mut words: Vec<(&str, i32)> = Vec::new();
        for (&page, text) in pages.iter() {
            for word in text.split_whitespace() {
                words.push((word, page));
            }
        }

        let mut out = Vec::new();
        if words.is_empty() {
            return Ok(out);
        }

        let mut start = 0usize;
        loop {
            if start >= words.len() {
                break;
            }
            let end = (start + WORD_OVERLAP_WINDOW).min(words.len());
            let window = &words[start..end];
            let page = window[0].1;
            let text = window.iter().map(|(w, _)| *w).collect::<Vec<_>>().join(" ");
            push_chunk(&mut out, page, text)?;
            if end == words.len() {
                break;
            }
            start += WORD_OVERLAP_STRIDE;
        }

        Ok(out)
    }
}

/// Construct the configured [`ChunkingStrategy`] (§9's single-dispatch-point
/// convention, mirrored from `ProviderFromConfig`).
pub fn strategy_from_kind(kind: ChunkingStrategyKind) -> Box<dyn ChunkingStrategy> {
    match kind {
        ChunkingStrategyKind::SentenceSplitter => Box::new(SentenceSplitter),
        ChunkingStrategyKind::WordOverlap => Box::new(WordOverlap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(items: &[(i32, &str)]) -> BTreeMap<i32, String> {
        items.iter().map(|(p, t)| (*p, t.to_string())).collect()
    }

    #[test]
    fn sentence_splitter_prefixes_every_chunk() {
        let p = pages(&[(2, "One sentence here. Another one follows. A third appears.")]);
        let chunks = SentenceSplitter.chunk(&p, 4, "Title").unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.starts_with("##Title##"));
        }
    }

    #[test]
    fn sentence_splitter_respects_page_numbers() {
        let p = pages(&[(3, "Hello world. Goodbye world.")]);
        let chunks = SentenceSplitter.chunk(&p, 10, "T").unwrap();
        assert!(chunks.iter().all(|c| c.page == 3));
    }

    #[test]
    fn sentence_splitter_hard_splits_overlong_sentence() {
        let long_sentence = (0..20).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let p = pages(&[(1, long_sentence.as_str())]);
        let chunks = SentenceSplitter.chunk(&p, 5, "T").unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            let body = c.text.trim_start_matches("##T##").trim();
            assert!(word_count(body) <= 5);
        }
    }

    #[test]
    fn word_overlap_never_prefixes() {
        let text = (0..500).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let p = pages(&[(5, text.as_str())]);
        let chunks = WordOverlap.chunk(&p, 999, "T").unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.starts_with("##"));
        }
    }

    #[test]
    fn word_overlap_windows_share_fifty_words() {
        let text = (0..500).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let p = pages(&[(1, text.as_str())]);
        let chunks = WordOverlap.chunk(&p, 0, "").unwrap();
        assert!(chunks.len() >= 2);
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second_words: Vec<&str> = chunks[1].text.split_whitespace().collect();
        let overlap = &first_words[first_words.len() - 50..];
        let second_prefix = &second_words[..50];
        assert_eq!(overlap, second_prefix);
    }

    #[test]
    fn word_overlap_last_window_may_be_short() {
        let text = (0..420).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let p = pages(&[(1, text.as_str())]);
        let chunks = WordOverlap.chunk(&p, 0, "").unwrap();
        let last = chunks.last().unwrap();
        assert!(word_count(&last.text) <= WORD_OVERLAP_WINDOW);
    }

    #[test]
    fn skip_first_page_removes_page_one_for_multi_page() {
        let p = pages(&[(1, "intro"), (2, "body"), (3, "more")]);
        let kept = skip_first_page(&p);
        assert!(!kept.contains_key(&1));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn skip_first_page_keeps_single_page_documents() {
        let p = pages(&[(1, "only page")]);
        let kept = skip_first_page(&p);
        assert!(kept.contains_key(&1));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn empty_chunk_is_rejected() {
        let mut out = Vec::new();
        let result = push_chunk(&mut out, 1, "   ".to_string());
        assert!(result.is_err());
    }
}
