//! Persistent vector store: embeddings, chunk metadata, document registry.
//!
//! The store exclusively owns three aligned structures: a dense vector
//! index, a chunk metadata table in the same positional order, and a
//! document registry mapping each document to its chunk ids. The alignment
//! invariant — `vectors.len() == chunks.len() == registry chunk ids
//! flattened` — is checked on every mutation; a violating mutation is
//! rejected before any state becomes visible to readers.
//!
//! Concurrency follows a single-writer/multi-reader discipline over one
//! `std::sync::RwLock`: searches run concurrently, mutations are exclusive,
//! and a reader observes either the pre- or post-mutation state, never an
//! intermediate one.
//!
//! Snapshots serialize the whole triple as one bincode blob, written to a
//! temp file in the target directory and atomically renamed into place, so
//! a crash mid-write never corrupts the previous valid snapshot.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, RegistryEntry};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    /// Embeddings, positionally aligned 1:1 with `chunks`.
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
    registry: HashMap<String, RegistryEntry>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    dims: usize,
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct Snapshot {
    dims: usize,
    state: StoreState,
}

/// Store-level statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub dims: usize,
}

/// In-memory vector index with snapshot persistence.
#[derive(Debug)]
pub struct VectorStore {
    dims: usize,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// Create an empty store for vectors of the given dimension.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Open a store from a snapshot file, or create an empty one when the
    /// file does not exist yet.
    pub fn open(path: &Path, dims: usize) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::new(dims));
        }
        Self::load(path, dims)
    }

    /// Atomically add or replace a document's chunks and embeddings.
    ///
    /// Returns the registry version assigned to the document (1 for a new
    /// document, previous + 1 on replacement).
    ///
    /// # Errors
    ///
    /// [`RetrievalError::IndexConsistency`] when chunk and embedding counts
    /// disagree, a vector has the wrong dimension, a chunk belongs to
    /// another document, or the staged state fails the alignment check. No
    /// partial state is ever visible to readers.
    pub fn upsert(
        &self,
        document_id: &str,
        content_hash: &str,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<u32> {
        if chunks.is_empty() {
            return Err(RetrievalError::consistency(format!(
                "upsert for '{document_id}' carries no chunks"
            )));
        }
        if chunks.len() != embeddings.len() {
            return Err(RetrievalError::consistency(format!(
                "upsert for '{document_id}': {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dims) {
            return Err(RetrievalError::consistency(format!(
                "upsert for '{document_id}': embedding dimension {} != index dimension {}",
                bad.len(),
                self.dims
            )));
        }
        if let Some(stray) = chunks.iter().find(|c| c.document_id != document_id) {
            return Err(RetrievalError::consistency(format!(
                "upsert for '{document_id}' contains chunk '{}' of document '{}'",
                stray.id, stray.document_id
            )));
        }

        let mut state = self.state.write().unwrap();

        // Stage the full post-mutation state, verify it, then commit. The
        // previous state stays untouched until the final assignment.
        let mut next_vectors = Vec::with_capacity(state.chunks.len() + chunks.len());
        let mut next_chunks = Vec::with_capacity(state.chunks.len() + chunks.len());
        for (vector, chunk) in state.vectors.iter().zip(state.chunks.iter()) {
            if chunk.document_id != document_id {
                next_vectors.push(vector.clone());
                next_chunks.push(chunk.clone());
            }
        }
        next_chunks.extend(chunks.iter().cloned());
        next_vectors.extend(embeddings);

        let version = state
            .registry
            .get(document_id)
            .map(|entry| entry.version + 1)
            .unwrap_or(1);

        let mut next_registry = state.registry.clone();
        next_registry.insert(
            document_id.to_string(),
            RegistryEntry {
                content_hash: content_hash.to_string(),
                version,
                chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
                last_ingested_at: Utc::now(),
            },
        );

        let staged = StoreState {
            vectors: next_vectors,
            chunks: next_chunks,
            registry: next_registry,
        };
        if let Err(reason) = check_alignment(&staged) {
            tracing::error!(document_id, %reason, "rejecting upsert");
            return Err(RetrievalError::consistency(reason));
        }

        tracing::info!(
            document_id,
            version,
            chunks = chunks.len(),
            "upserted document"
        );
        *state = staged;
        Ok(version)
    }

    /// Remove a document and all its chunks. Returns `false` (not an
    /// error) when the document is unknown.
    pub fn remove(&self, document_id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if !state.registry.contains_key(document_id) {
            tracing::debug!(document_id, "remove of unknown document is a no-op");
            return Ok(false);
        }

        let mut next_vectors = Vec::with_capacity(state.chunks.len());
        let mut next_chunks = Vec::with_capacity(state.chunks.len());
        for (vector, chunk) in state.vectors.iter().zip(state.chunks.iter()) {
            if chunk.document_id != document_id {
                next_vectors.push(vector.clone());
                next_chunks.push(chunk.clone());
            }
        }
        let mut next_registry = state.registry.clone();
        next_registry.remove(document_id);

        let staged = StoreState {
            vectors: next_vectors,
            chunks: next_chunks,
            registry: next_registry,
        };
        if let Err(reason) = check_alignment(&staged) {
            tracing::error!(document_id, %reason, "rejecting remove");
            return Err(RetrievalError::consistency(reason));
        }

        let removed = state.chunks.len() - staged.chunks.len();
        tracing::info!(document_id, chunks = removed, "removed document");
        *state = staged;
        Ok(true)
    }

    /// Return the `k` chunks nearest to `query` by cosine similarity.
    ///
    /// Ties are broken by lower ordinal, then chunk id, so output order is
    /// deterministic for a fixed index.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::EmptyIndex`] when the store holds zero chunks.
    pub fn search_vectors(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f64)>> {
        let state = self.state.read().unwrap();
        if state.chunks.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        let mut scored: Vec<(usize, f64)> = state
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ca = &state.chunks[a.0];
                    let cb = &state.chunks[b.0];
                    ca.ordinal.cmp(&cb.ordinal).then(ca.id.cmp(&cb.id))
                })
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (state.chunks[i].clone(), score))
            .collect())
    }

    /// Contiguous chunks of one document with ordinals in
    /// `[ordinal_start, ordinal_end]`, in ordinal order. Used for context
    /// window expansion.
    pub fn get_chunk_range(
        &self,
        document_id: &str,
        ordinal_start: u32,
        ordinal_end: u32,
    ) -> Vec<Chunk> {
        let state = self.state.read().unwrap();
        let mut range: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|c| {
                c.document_id == document_id
                    && c.ordinal >= ordinal_start
                    && c.ordinal <= ordinal_end
            })
            .cloned()
            .collect();
        range.sort_by_key(|c| c.ordinal);
        range
    }

    /// Registry entry for a document, if ingested.
    pub fn registry_entry(&self, document_id: &str) -> Option<RegistryEntry> {
        self.state.read().unwrap().registry.get(document_id).cloned()
    }

    /// Run `f` against the chunk metadata table under a shared read lock.
    ///
    /// This is how the keyword scorer sees the corpus without the store
    /// giving up ownership or cloning every chunk per query.
    pub fn read_chunks<R>(&self, f: impl FnOnce(&[Chunk]) -> R) -> R {
        let state = self.state.read().unwrap();
        f(&state.chunks)
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.read().unwrap();
        StoreStats {
            documents: state.registry.len(),
            chunks: state.chunks.len(),
            dims: self.dims,
        }
    }

    /// Drop all documents, chunks, and vectors.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        tracing::warn!(
            documents = state.registry.len(),
            chunks = state.chunks.len(),
            "clearing vector store"
        );
        *state = StoreState::default();
    }

    /// Write a snapshot of index + metadata + registry to `path`.
    ///
    /// The blob is written to a temp file in the destination directory and
    /// atomically renamed over `path`, so an interrupted persist leaves the
    /// previous snapshot intact.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let state = self.state.read().unwrap();
        let bytes = bincode::serialize(&SnapshotRef {
            dims: self.dims,
            state: &state,
        })
        .map_err(|e| RetrievalError::persistence(path, e))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| RetrievalError::persistence(path, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| RetrievalError::persistence(path, e))?;
        tmp.write_all(&bytes)
            .map_err(|e| RetrievalError::persistence(path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| RetrievalError::persistence(path, e))?;
        tmp.persist(path)
            .map_err(|e| RetrievalError::persistence(path, e.error))?;

        tracing::info!(
            path = %path.display(),
            chunks = state.chunks.len(),
            documents = state.registry.len(),
            "persisted snapshot"
        );
        Ok(())
    }

    /// Load a snapshot, validating dimension and the alignment invariant.
    pub fn load(path: &Path, dims: usize) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| RetrievalError::persistence(path, e))?;
        let snapshot: Snapshot =
            bincode::deserialize(&bytes).map_err(|e| RetrievalError::persistence(path, e))?;

        if snapshot.dims != dims {
            return Err(RetrievalError::persistence(
                path,
                format!(
                    "snapshot dimension {} does not match configured dimension {dims}",
                    snapshot.dims
                ),
            ));
        }
        if let Err(reason) = check_alignment(&snapshot.state) {
            return Err(RetrievalError::persistence(path, reason));
        }

        tracing::info!(
            path = %path.display(),
            chunks = snapshot.state.chunks.len(),
            documents = snapshot.state.registry.len(),
            "loaded snapshot"
        );
        Ok(Self {
            dims,
            state: RwLock::new(snapshot.state),
        })
    }
}

/// Verify the index/metadata/registry alignment invariant, returning a
/// diagnostic string on violation.
fn check_alignment(state: &StoreState) -> std::result::Result<(), String> {
    if state.vectors.len() != state.chunks.len() {
        return Err(format!(
            "{} vectors but {} chunk records",
            state.vectors.len(),
            state.chunks.len()
        ));
    }
    let registered: usize = state.registry.values().map(|e| e.chunk_ids.len()).sum();
    if registered != state.chunks.len() {
        return Err(format!(
            "registry lists {registered} chunk ids but the table holds {}",
            state.chunks.len()
        ));
    }
    for (document_id, entry) in &state.registry {
        let held = state
            .chunks
            .iter()
            .filter(|c| &c.document_id == document_id)
            .count();
        if held != entry.chunk_ids.len() {
            return Err(format!(
                "document '{document_id}' registers {} chunks but the table holds {held}",
                entry.chunk_ids.len()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMeta;
    use std::path::PathBuf;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            title: Some("t".into()),
            author: None,
            page_count: None,
            source_path: PathBuf::from("doc.txt"),
            ingested_at: Utc::now(),
        }
    }

    fn chunk(doc: &str, ordinal: u32, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(doc, ordinal),
            document_id: doc.to_string(),
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            ordinal,
            content_hash: format!("hash-{ordinal}"),
            meta: meta(),
        }
    }

    fn unit(x: f32, y: f32) -> Vec<f32> {
        vec![x, y]
    }

    #[test]
    fn test_upsert_and_version() {
        let store = VectorStore::new(2);
        let v1 = store
            .upsert(
                "d1",
                "h1",
                vec![chunk("d1", 0, "alpha"), chunk("d1", 1, "beta")],
                vec![unit(1.0, 0.0), unit(0.0, 1.0)],
            )
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(store.len(), 2);

        let v2 = store
            .upsert(
                "d1",
                "h2",
                vec![chunk("d1", 0, "gamma")],
                vec![unit(1.0, 1.0)],
            )
            .unwrap();
        assert_eq!(v2, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.registry_entry("d1").unwrap().content_hash, "h2");
    }

    #[test]
    fn test_length_mismatch_rejected_without_mutation() {
        let store = VectorStore::new(2);
        store
            .upsert("d1", "h1", vec![chunk("d1", 0, "a")], vec![unit(1.0, 0.0)])
            .unwrap();

        let err = store.upsert(
            "d2",
            "h2",
            vec![chunk("d2", 0, "b"), chunk("d2", 1, "c")],
            vec![unit(0.0, 1.0)],
        );
        assert!(matches!(err, Err(RetrievalError::IndexConsistency { .. })));
        // Prior state is untouched.
        assert_eq!(store.len(), 1);
        assert!(store.registry_entry("d2").is_none());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = VectorStore::new(2);
        let err = store.upsert("d1", "h1", vec![chunk("d1", 0, "a")], vec![vec![1.0, 0.0, 0.0]]);
        assert!(matches!(err, Err(RetrievalError::IndexConsistency { .. })));
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let store = VectorStore::new(2);
        assert!(!store.remove("ghost").unwrap());
    }

    #[test]
    fn test_remove_cascades() {
        let store = VectorStore::new(2);
        store
            .upsert(
                "d1",
                "h1",
                vec![chunk("d1", 0, "a"), chunk("d1", 1, "b")],
                vec![unit(1.0, 0.0), unit(0.0, 1.0)],
            )
            .unwrap();
        store
            .upsert("d2", "h2", vec![chunk("d2", 0, "c")], vec![unit(1.0, 1.0)])
            .unwrap();

        assert!(store.remove("d1").unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.registry_entry("d1").is_none());
        assert!(store.registry_entry("d2").is_some());
    }

    #[test]
    fn test_search_empty_index() {
        let store = VectorStore::new(2);
        assert!(matches!(
            store.search_vectors(&[1.0, 0.0], 5),
            Err(RetrievalError::EmptyIndex)
        ));
    }

    #[test]
    fn test_search_orders_by_similarity_then_ordinal() {
        let store = VectorStore::new(2);
        store
            .upsert(
                "d1",
                "h1",
                vec![
                    chunk("d1", 0, "x axis"),
                    chunk("d1", 1, "y axis"),
                    chunk("d1", 2, "x axis too"),
                ],
                vec![unit(1.0, 0.0), unit(0.0, 1.0), unit(1.0, 0.0)],
            )
            .unwrap();

        let results = store.search_vectors(&[1.0, 0.0], 3).unwrap();
        // Two ties at similarity 1.0 resolve by lower ordinal.
        assert_eq!(results[0].0.ordinal, 0);
        assert_eq!(results[1].0.ordinal, 2);
        assert_eq!(results[2].0.ordinal, 1);
    }

    #[test]
    fn test_get_chunk_range() {
        let store = VectorStore::new(2);
        store
            .upsert(
                "d1",
                "h1",
                (0..5).map(|i| chunk("d1", i, "text")).collect(),
                (0..5).map(|_| unit(1.0, 0.0)).collect(),
            )
            .unwrap();

        let range = store.get_chunk_range("d1", 1, 3);
        assert_eq!(
            range.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(store.get_chunk_range("other", 0, 3).is_empty());
    }

    #[test]
    fn test_alignment_after_mixed_mutations() {
        let store = VectorStore::new(2);
        for doc in ["a", "b", "c"] {
            store
                .upsert(
                    doc,
                    "h",
                    vec![chunk(doc, 0, "one"), chunk(doc, 1, "two")],
                    vec![unit(1.0, 0.0), unit(0.0, 1.0)],
                )
                .unwrap();
        }
        store.remove("b").unwrap();
        store
            .upsert("a", "h2", vec![chunk("a", 0, "three")], vec![unit(1.0, 1.0)])
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks, 3);
        // Internal cross-check.
        let registered: usize = ["a", "c"]
            .iter()
            .map(|d| store.registry_entry(d).unwrap().chunk_ids.len())
            .sum();
        assert_eq!(registered, stats.chunks);
    }
}
