//! Offset-tracking overlap chunker.
//!
//! Splits normalized document text into chunks of at most `chunk_size`
//! bytes, with adjacent chunks sharing `chunk_overlap` bytes of text so a
//! fact sitting on a boundary is retrievable from either side. Offsets are
//! recorded into the normalized text and together cover the whole document
//! with no gaps.
//!
//! # Algorithm
//!
//! 1. Normalize the text (drop form feeds, collapse blank-line runs and
//!    intra-line whitespace, trim).
//! 2. Place a window of `chunk_size` bytes at the cursor; if a paragraph
//!    break (`\n\n`) falls within a small look-back window of the cut
//!    point, snap the cut to it instead of splitting mid-paragraph.
//! 3. Emit the chunk, then restart the window `chunk_overlap` bytes before
//!    its end.
//!
//! A document shorter than `chunk_size` yields exactly one chunk. Because
//! each window starts `chunk_overlap` bytes behind the previous end, the
//! trailing chunk is always longer than the overlap and a degenerate tail
//! chunk cannot occur.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, DocumentMeta};

/// How far behind the nominal cut point a paragraph break may sit and
/// still capture the cut.
const PARAGRAPH_LOOKBACK: usize = 120;

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\f\v\r]").unwrap());
static NEWLINE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Normalize raw document text before hashing and chunking.
///
/// Mirrors the cleanup applied at load time: form feeds and vertical tabs
/// are dropped, runs of three or more newlines become a paragraph break,
/// and runs of spaces/tabs collapse to a single space. Newlines are
/// preserved so paragraph structure survives.
pub fn normalize_text(text: &str) -> String {
    let no_controls = CONTROL_CHARS.replace_all(text, "");
    let paragraphs = NEWLINE_RUNS.replace_all(&no_controls, "\n\n");
    let spaces = HORIZONTAL_WS.replace_all(&paragraphs, " ");
    spaces.trim().to_string()
}

/// Split normalized text into overlapping chunks with exact offsets.
///
/// # Errors
///
/// Returns [`RetrievalError::Chunking`] when `text` is empty.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    meta: &DocumentMeta,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>> {
    if text.is_empty() {
        return Err(RetrievalError::Chunking {
            document_id: document_id.to_string(),
            reason: "document text is empty after normalization".to_string(),
        });
    }

    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let mut end = snap_to_char_boundary(text, (start + config.chunk_size).min(len));

        if end < len {
            end = snap_to_paragraph(text, start, end);
        }

        chunks.push(make_chunk(document_id, ordinal, text, start, end, meta));
        ordinal += 1;

        if end >= len {
            break;
        }

        let mut next = snap_to_char_boundary(text, end.saturating_sub(config.chunk_overlap));
        if next <= start {
            // Window failed to advance (overlap >= emitted chunk); give up
            // the overlap for this boundary rather than loop forever.
            next = end;
        }
        start = next;
    }

    Ok(chunks)
}

/// Pull the cut point back to a paragraph break within the look-back
/// window, keeping the `\n\n` with the earlier chunk.
fn snap_to_paragraph(text: &str, start: usize, end: usize) -> usize {
    let window_start = end.saturating_sub(PARAGRAPH_LOOKBACK).max(start);
    let window_start = snap_to_char_boundary(text, window_start);
    match text[window_start..end].rfind("\n\n") {
        Some(pos) if window_start + pos + 2 > start => window_start + pos + 2,
        _ => end,
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(
    document_id: &str,
    ordinal: u32,
    text: &str,
    start: usize,
    end: usize,
    meta: &DocumentMeta,
) -> Chunk {
    let slice = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(slice.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Chunk::make_id(document_id, ordinal),
        document_id: document_id.to_string(),
        text: slice.to_string(),
        start_offset: start,
        end_offset: end,
        ordinal,
        content_hash: hash,
        meta: meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            title: None,
            author: None,
            page_count: None,
            source_path: PathBuf::from("doc.txt"),
            ingested_at: Utc::now(),
        }
    }

    fn cfg(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn test_empty_text_is_an_error() {
        let err = chunk_text("doc1", "", &meta(), &cfg(1000, 200));
        assert!(err.is_err());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &meta(), &cfg(1000, 200)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 13);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].id, "doc1#0");
    }

    #[test]
    fn test_example_scenario_offsets() {
        // 2,400 uniform characters at 1000/200 produce exactly three
        // windows: [0,1000), [800,1800), [1600,2400).
        let text = "a".repeat(2400);
        let chunks = chunk_text("doc1", &text, &meta(), &cfg(1000, 200)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks
                .iter()
                .map(|c| (c.start_offset, c.end_offset))
                .collect::<Vec<_>>(),
            vec![(0, 1000), (800, 1800), (1600, 2400)]
        );
    }

    #[test]
    fn test_coverage_no_gaps_and_exact_overlap() {
        let text = "x".repeat(5321);
        let config = cfg(700, 150);
        let chunks = chunk_text("doc1", &text, &meta(), &config).unwrap();

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
        for pair in chunks.windows(2) {
            // No gap, and (with no paragraph breaks) exactly the
            // configured overlap of shared text.
            assert!(pair[1].start_offset < pair[0].end_offset);
            assert_eq!(pair[0].end_offset - pair[1].start_offset, config.chunk_overlap);
        }
    }

    #[test]
    fn test_no_degenerate_tail_chunk() {
        // 1,001 chars: the tail window is 201 bytes, longer than the
        // overlap, never a standalone sliver.
        let text = "y".repeat(1001);
        let config = cfg(1000, 200);
        let chunks = chunk_text("doc1", &text, &meta(), &config).unwrap();
        assert_eq!(chunks.len(), 2);
        let last = chunks.last().unwrap();
        assert!(last.end_offset - last.start_offset > config.chunk_overlap);
    }

    #[test]
    fn test_paragraph_boundary_snap() {
        // A paragraph break 40 bytes before the nominal cut should
        // capture the cut point.
        let first = "p".repeat(160);
        let second = "q".repeat(400);
        let text = format!("{first}\n\n{second}");
        let chunks = chunk_text("doc1", &text, &meta(), &cfg(200, 40)).unwrap();
        assert_eq!(chunks[0].end_offset, 162); // 160 + "\n\n"
        assert!(chunks[0].text.ends_with("\n\n"));
    }

    #[test]
    fn test_multibyte_utf8_boundaries() {
        let text = "héllo wörld ü".repeat(300);
        let chunks = chunk_text("doc1", &text, &meta(), &cfg(100, 20)).unwrap();
        for c in &chunks {
            // Offsets must land on char boundaries; slicing would panic
            // otherwise.
            assert_eq!(&text[c.start_offset..c.end_offset], c.text);
            // Sizes are byte budgets: boundary snapping may undershoot
            // but never overshoot.
            assert!(c.end_offset - c.start_offset <= 100);
        }
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
    }

    #[test]
    fn test_normalize_text() {
        let raw = "Title\x0c\n\n\n\nBody   with\tspaces\n\nNext";
        let normalized = normalize_text(raw);
        assert_eq!(normalized, "Title\n\nBody with spaces\n\nNext");
    }

    #[test]
    fn test_deterministic() {
        let text = "alpha beta gamma ".repeat(200);
        let a = chunk_text("doc1", &text, &meta(), &cfg(300, 60)).unwrap();
        let b = chunk_text("doc1", &text, &meta(), &cfg(300, 60)).unwrap();
        assert_eq!(a, b);
    }
}
