//! Paragraph-boundary text chunker.
//!
//! Splits document content into passages that respect a configurable
//! `max_tokens` limit. Paragraph boundaries (blank lines) are preferred;
//! paragraphs that are too long fall back to sentence boundaries, then word
//! boundaries, and only a single word longer than the limit is hard-split.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Cut the text into contiguous segments (byte ranges) that each fit,
//!    refining paragraph → sentence → word → character only where needed.
//!    The separating whitespace stays attached to the segment before it, so
//!    the segments tile the input with no gaps.
//! 3. Greedily merge neighbouring segments while the merged span still fits.
//! 4. Emit each span with surrounding whitespace trimmed; whitespace-only
//!    spans are dropped.
//!
//! Removing whitespace from the input and from the concatenated chunks gives
//! the same string, and no chunk exceeds `max_tokens` by [`estimate_tokens`].
//!
//! # Example
//!
//! ```rust
//! use doc_indexer::chunk::split;
//!
//! let chunks = split("Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph."]);
//! ```

use std::ops::Range;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Token estimate used for the chunk bound: characters / 4, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into ordered passages of at most `max_tokens` tokens each.
///
/// Empty or whitespace-only input yields an empty vector. Same input, same
/// output: the result depends on nothing but the arguments.
pub fn split(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    let mut segments = Vec::new();
    for paragraph in pieces(text, 0..text.len(), Level::Paragraph) {
        refine(text, paragraph, Level::Sentence, max_chars, &mut segments);
    }

    let mut chunks = Vec::new();
    let mut current: Option<Range<usize>> = None;
    for segment in segments {
        current = match current {
            None => Some(segment),
            Some(span) => {
                let merged = span.start..segment.end;
                if trimmed_chars(&text[merged.clone()]) <= max_chars {
                    Some(merged)
                } else {
                    push_trimmed(&mut chunks, &text[span]);
                    Some(segment)
                }
            }
        };
    }
    if let Some(span) = current {
        push_trimmed(&mut chunks, &text[span]);
    }

    chunks
}

/// Split a document's content into [`Chunk`]s numbered from 0.
pub fn chunk_document(text: &str, max_tokens: usize) -> Vec<Chunk> {
    split(text, max_tokens)
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| Chunk { chunk_id, text })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Paragraph,
    Sentence,
    Word,
    Char,
}

impl Level {
    fn finer(self) -> Level {
        match self {
            Level::Paragraph => Level::Sentence,
            Level::Sentence => Level::Word,
            Level::Word | Level::Char => Level::Char,
        }
    }

    /// Whether a whitespace run ends a piece at this level, given the last
    /// non-whitespace character before it and the newlines inside it.
    fn breaks_after(self, prev: Option<char>, newlines: usize) -> bool {
        match self {
            Level::Paragraph => newlines >= 2,
            Level::Sentence => newlines >= 1 || matches!(prev, Some('.' | '!' | '?')),
            Level::Word => true,
            Level::Char => false,
        }
    }
}

fn refine(text: &str, span: Range<usize>, level: Level, max_chars: usize, out: &mut Vec<Range<usize>>) {
    if trimmed_chars(&text[span.clone()]) <= max_chars {
        out.push(span);
        return;
    }
    if level == Level::Char {
        hard_split(text, span, max_chars, out);
        return;
    }
    for piece in pieces(text, span, level) {
        refine(text, piece, level.finer(), max_chars, out);
    }
}

/// Cut `span` after every whitespace run that counts as a boundary at
/// `level`. The pieces cover `span` exactly.
fn pieces(text: &str, span: Range<usize>, level: Level) -> Vec<Range<usize>> {
    let slice = &text[span.clone()];
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut in_run = false;
    let mut newlines = 0;

    for (i, c) in slice.char_indices() {
        if c.is_whitespace() {
            if !in_run {
                in_run = true;
                newlines = 0;
            }
            if c == '\n' {
                newlines += 1;
            }
            continue;
        }
        if in_run {
            in_run = false;
            if i > start && level.breaks_after(prev, newlines) {
                out.push(span.start + start..span.start + i);
                start = i;
            }
        }
        prev = Some(c);
    }
    if start < slice.len() {
        out.push(span.start + start..span.end);
    }
    out
}

fn hard_split(text: &str, span: Range<usize>, max_chars: usize, out: &mut Vec<Range<usize>>) {
    let slice = &text[span.clone()];
    let mut start = 0;
    for (count, (i, _)) in slice.char_indices().enumerate() {
        if count > 0 && count % max_chars == 0 {
            out.push(span.start + start..span.start + i);
            start = i;
        }
    }
    if start < slice.len() {
        out.push(span.start + start..span.end);
    }
}

fn trimmed_chars(s: &str) -> usize {
    s.trim().chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, s: &str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn assert_covers(text: &str, chunks: &[String], max_tokens: usize) {
        assert_eq!(strip_ws(text), strip_ws(&chunks.concat()));
        let mut cursor = 0;
        for chunk in chunks {
            assert!(estimate_tokens(chunk) <= max_tokens, "chunk too long: {:?}", chunk);
            let found = text[cursor..].find(chunk.as_str()).expect("chunk out of order");
            cursor += found + chunk.len();
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split("Hello, world!", 700);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split("", 700).is_empty());
        assert!(split("  \n\n \t ", 700).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split(text, 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_paragraphs_split_on_blank_lines() {
        // max_tokens=6 => max_chars=24, each paragraph is 22 chars
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph 3.";
        let chunks = split(text, 6);
        assert_eq!(
            chunks,
            vec![
                "This is paragraph one.",
                "This is paragraph two.",
                "This is paragraph 3."
            ]
        );
    }

    #[test]
    fn test_long_paragraph_splits_on_sentences() {
        let sentence = "The quick brown fox jumps over the dog.";
        assert_eq!(sentence.len(), 39);
        let text = vec![sentence; 25].join(" ");
        assert_eq!(estimate_tokens(&text), 250);

        let chunks = split(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.ends_with("dog.")));
        assert_covers(&text, &chunks, 100);
    }

    #[test]
    fn test_oversized_word_is_hard_split() {
        let word = "x".repeat(30);
        let chunks = split(&word, 2);
        assert_eq!(chunks, vec!["x".repeat(8), "x".repeat(8), "x".repeat(8), "x".repeat(6)]);
    }

    #[test]
    fn test_multibyte_text_respects_char_boundaries() {
        let text = "ünïcödé ".repeat(40);
        let chunks = split(&text, 5);
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks, 5);
    }

    #[test]
    fn test_coverage_and_bound_across_limits() {
        let text = (0..40)
            .map(|i| {
                if i % 7 == 0 {
                    format!("Heading {}\n\n", i)
                } else {
                    format!("Sentence number {} goes here! Another one? Yes. ", i)
                }
            })
            .collect::<String>();
        for max_tokens in [1, 3, 10, 25, 100, 1000] {
            let chunks = split(&text, max_tokens);
            assert_covers(&text, &chunks, max_tokens);
        }
    }

    #[test]
    fn test_chunk_ids_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(split(text, 2), split(text, 2));
    }
}
