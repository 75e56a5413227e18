//! Core data models used throughout the retrieval engine.
//!
//! These types represent the documents, chunks, and scored results that flow
//! through the ingestion and retrieval pipeline. All persisted types derive
//! `Serialize`/`Deserialize` so the store can snapshot them as one unit.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata inherited from a source document by every one of its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<u32>,
    pub source_path: PathBuf,
    pub ingested_at: DateTime<Utc>,
}

/// A normalized document handed to the ingestion pipeline by a loader.
///
/// `id` is derived from the source path alone, so re-ingesting a changed
/// file replaces the previous version instead of inserting a sibling.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub id: String,
    pub text: String,
    pub meta: DocumentMeta,
}

/// A contiguous excerpt of a document, the unit of indexing and retrieval.
///
/// `start_offset`/`end_offset` are byte offsets into the normalized document
/// text (snapped to UTF-8 boundaries); `ordinal` is the chunk's position
/// within its document and defines adjacency for context windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub ordinal: u32,
    pub content_hash: String,
    pub meta: DocumentMeta,
}

impl Chunk {
    /// Chunk ids are `"{document_id}#{ordinal}"`, stable across runs.
    pub fn make_id(document_id: &str, ordinal: u32) -> String {
        format!("{document_id}#{ordinal}")
    }
}

/// Registry record tracking one ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub content_hash: String,
    /// Monotonic counter, bumped each time the content hash changes.
    pub version: u32,
    /// Chunk ids in ordinal order.
    pub chunk_ids: Vec<String>,
    pub last_ingested_at: DateTime<Utc>,
}

/// A scored chunk returned by the hybrid search engine.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity; raw in semantic mode, min-max normalized over
    /// the candidate set in hybrid mode, 0.0 when not a semantic candidate.
    pub semantic_score: f64,
    /// BM25 score; raw in keyword mode, min-max normalized in hybrid mode,
    /// 0.0 when not a keyword candidate.
    pub keyword_score: f64,
    /// `w * semantic + (1 - w) * keyword`.
    pub hybrid_score: f64,
    /// Position in the result list, starting at 0.
    pub rank: usize,
}

/// A merged result produced by adaptive multi-query retrieval.
///
/// `queries` lists every input query that retrieved this chunk, in the
/// order they were encountered.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f64,
    pub queries: Vec<String>,
}

/// Per-document outcome of an ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub enum DocOutcome {
    Inserted,
    Replaced,
    Skipped,
    Failed(String),
}

/// Summary of a batch ingestion run.
///
/// A failure on one document never aborts the batch; it is recorded here
/// instead.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(document_id, outcome)` in processing order.
    pub outcomes: Vec<(String, DocOutcome)>,
}

impl IngestReport {
    pub fn record(&mut self, document_id: String, outcome: DocOutcome) {
        match outcome {
            DocOutcome::Inserted => self.inserted += 1,
            DocOutcome::Replaced => self.replaced += 1,
            DocOutcome::Skipped => self.skipped += 1,
            DocOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push((document_id, outcome));
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}
