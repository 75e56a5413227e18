//! Deterministic hybrid retrieval over local document collections.
//!
//! `ragstore` ingests text documents, splits them into overlapping
//! chunks, embeds them through an external gateway, and answers queries
//! by fusing dense cosine similarity with sparse BM25 scoring. The whole
//! index lives in memory behind a single-writer/multi-reader lock and
//! persists as one atomic snapshot on disk.
//!
//! Typical flow:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ragstore::{
//!     Config, HttpEmbedder, HybridSearchEngine, IngestionPipeline, SearchMode, VectorStore,
//! };
//!
//! # async fn run() -> ragstore::Result<()> {
//! let config = Config::default();
//! let store = Arc::new(VectorStore::open(
//!     &config.store.snapshot_path,
//!     config.embedding.dims,
//! )?);
//! let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
//!
//! let pipeline = IngestionPipeline::new(store.clone(), embedder.clone(), &config);
//! pipeline.ingest_directory(Path::new("docs"), &config.source).await?;
//! store.persist(&config.store.snapshot_path)?;
//!
//! let engine = HybridSearchEngine::new(store, embedder, (&config.retrieval).into());
//! let hits = engine.search("snapshot atomicity", 5, SearchMode::Hybrid).await?;
//! # drop(hits);
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod sources;
pub mod store;

pub use config::{load_config, Config};
pub use embedding::{Embedder, HttpEmbedder};
pub use error::{Result, RetrievalError};
pub use ingest::IngestionPipeline;
pub use models::{
    Chunk, DocOutcome, DocumentInput, DocumentMeta, IngestReport, RetrievedChunk, SearchHit,
};
pub use retrieval::AdaptiveRetriever;
pub use search::{HybridSearchEngine, SearchMode, SearchOptions};
pub use store::{StoreStats, VectorStore};
