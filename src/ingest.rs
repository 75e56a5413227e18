//! Ingestion pipeline: normalize, dedup, chunk, embed, upsert.
//!
//! Each document's normalized text is content-hashed before any expensive
//! work. An unchanged document is skipped outright; a changed one replaces
//! its previous version atomically in the store. One failing document
//! never aborts a batch run, its outcome is recorded and the pipeline
//! moves on.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::chunker::{chunk_text, normalize_text};
use crate::config::{ChunkingConfig, Config, SourceConfig};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::{DocOutcome, DocumentInput, IngestReport};
use crate::sources;
use crate::store::VectorStore;

pub struct IngestionPipeline {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            store,
            embedder,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Ingest one document. Never returns an error; every failure mode is
    /// folded into the [`DocOutcome`] so batch callers stay uniform.
    pub async fn ingest_document(&self, doc: &DocumentInput) -> DocOutcome {
        match self.try_ingest(doc).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "document failed to ingest");
                DocOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_ingest(&self, doc: &DocumentInput) -> Result<DocOutcome> {
        let normalized = normalize_text(&doc.text);
        let content_hash = hash_text(&normalized);

        let previous = self.store.registry_entry(&doc.id);
        if let Some(entry) = &previous {
            if entry.content_hash == content_hash {
                tracing::debug!(document_id = %doc.id, "content unchanged, skipping");
                return Ok(DocOutcome::Skipped);
            }
        }

        let chunks = chunk_text(&doc.id, &normalized, &doc.meta, &self.chunking)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embed_all(&texts).await?;

        let version = self
            .store
            .upsert(&doc.id, &content_hash, chunks, embeddings)?;

        if previous.is_some() {
            tracing::info!(document_id = %doc.id, version, "replaced document");
            Ok(DocOutcome::Replaced)
        } else {
            tracing::info!(document_id = %doc.id, "inserted document");
            Ok(DocOutcome::Inserted)
        }
    }

    /// Embed every chunk text in configured batch sizes.
    ///
    /// When a whole batch fails after the gateway's own retries, each text
    /// in that batch is retried individually once, so a single poison
    /// input surfaces alone instead of taking its batchmates down. If any
    /// individual retry still fails the document fails, since a chunk
    /// without a vector cannot enter the index.
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match self.embedder.embed_batch(batch).await {
                Ok(mut batch_vectors) => vectors.append(&mut batch_vectors),
                Err(batch_err) => {
                    tracing::warn!(
                        batch = batch.len(),
                        error = %batch_err,
                        "batch embedding failed, retrying individually"
                    );
                    for text in batch {
                        vectors.push(self.embedder.embed_query(text).await?);
                    }
                }
            }
        }
        Ok(vectors)
    }

    /// Ingest a batch of documents with per-document failure isolation.
    pub async fn ingest_batch(&self, docs: &[DocumentInput]) -> IngestReport {
        let mut report = IngestReport::default();
        for doc in docs {
            let outcome = self.ingest_document(doc).await;
            report.record(doc.id.clone(), outcome);
        }
        tracing::info!(
            total = report.total(),
            inserted = report.inserted,
            replaced = report.replaced,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion batch complete"
        );
        report
    }

    /// Scan `root` with the source globs and ingest every matching file.
    ///
    /// An unreadable file is recorded as a failed document; only a broken
    /// glob configuration aborts the run.
    pub async fn ingest_directory(&self, root: &Path, source: &SourceConfig) -> Result<IngestReport> {
        let paths = sources::scan_paths(root, source)?;
        let mut report = IngestReport::default();
        for relative in paths {
            match sources::load_document(root, &relative) {
                Ok(doc) => {
                    let outcome = self.ingest_document(&doc).await;
                    report.record(doc.id, outcome);
                }
                Err(e) => {
                    tracing::warn!(path = %relative.display(), error = %e, "failed to load source");
                    report.record(sources::document_id(&relative), DocOutcome::Failed(e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

/// SHA-256 of normalized document text, hex-encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::models::DocumentMeta;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;

    /// Deterministic embedder: folds bytes into a fixed-width vector.
    struct FakeEmbedder {
        fail_marker: Option<String>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn dims(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if let Some(marker) = &self.fail_marker {
                if texts.iter().any(|t| t.contains(marker.as_str())) {
                    return Err(RetrievalError::embedding("marker hit"));
                }
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = [0.0f32; 4];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % 4] += b as f32;
                    }
                    v.to_vec()
                })
                .collect())
        }
    }

    fn doc(id: &str, text: &str) -> DocumentInput {
        DocumentInput {
            id: id.to_string(),
            text: text.to_string(),
            meta: DocumentMeta {
                title: Some(id.to_string()),
                author: None,
                page_count: None,
                source_path: PathBuf::from(format!("{id}.txt")),
                ingested_at: Utc::now(),
            },
        }
    }

    fn pipeline(fail_marker: Option<&str>) -> IngestionPipeline {
        let mut config = Config::default();
        config.embedding.dims = 4;
        IngestionPipeline::new(
            Arc::new(VectorStore::new(4)),
            Arc::new(FakeEmbedder {
                fail_marker: fail_marker.map(str::to_string),
            }),
            &config,
        )
    }

    #[tokio::test]
    async fn test_insert_then_skip_then_replace() {
        let p = pipeline(None);

        assert_eq!(p.ingest_document(&doc("d1", "first version")).await, DocOutcome::Inserted);
        assert_eq!(p.ingest_document(&doc("d1", "first version")).await, DocOutcome::Skipped);
        assert_eq!(p.ingest_document(&doc("d1", "second version")).await, DocOutcome::Replaced);

        let entry = p.store().registry_entry("d1").unwrap();
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn test_skip_ignores_whitespace_noise() {
        let p = pipeline(None);
        p.ingest_document(&doc("d1", "same   text\r\n")).await;
        // Normalization collapses the formatting difference.
        assert_eq!(
            p.ingest_document(&doc("d1", "same text")).await,
            DocOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_empty_document_fails_alone() {
        let p = pipeline(None);
        let report = p
            .ingest_batch(&[doc("good", "usable text"), doc("empty", "   \n\n  ")])
            .await;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 1);
        assert!(p.store().registry_entry("good").is_some());
        assert!(p.store().registry_entry("empty").is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_isolated_per_document() {
        let p = pipeline(Some("poison"));
        let report = p
            .ingest_batch(&[doc("bad", "this text is poison"), doc("ok", "clean text")])
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
        assert!(matches!(report.outcomes[0].1, DocOutcome::Failed(_)));
        // Failed document left no partial state behind.
        assert!(p.store().registry_entry("bad").is_none());
    }

    #[tokio::test]
    async fn test_ingest_directory() {
        let p = pipeline(None);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha document body").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta document body").unwrap();
        std::fs::write(dir.path().join("c.rs"), "not matched").unwrap();

        let report = p
            .ingest_directory(dir.path(), &SourceConfig::default())
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(p.store().stats().documents, 2);
    }

    #[test]
    fn test_hash_text_stable() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
        assert_eq!(hash_text("abc").len(), 64);
    }
}
