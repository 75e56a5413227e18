#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::Utc;
use ragstore::{Config, DocumentInput, DocumentMeta, Embedder, IngestionPipeline, VectorStore};

pub const DIMS: usize = 8;

static TRACING: Once = Once::new();

/// Route crate logs through the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic bag-of-words embedder: each token lands in a hash
/// bucket, so texts sharing vocabulary come out cosine-similar. No
/// network, no randomness.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> ragstore::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket: usize = token.bytes().map(|b| b as usize).sum::<usize>() % DIMS;
        v[bucket] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

pub fn doc(id: &str, text: &str) -> DocumentInput {
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

pub fn test_config() -> Config {
    init_tracing();
    let mut config = Config::default();
    config.embedding.dims = DIMS;
    // Small windows keep multi-chunk behavior reachable from short fixtures.
    config.chunking.chunk_size = 120;
    config.chunking.chunk_overlap = 30;
    config
}

pub fn pipeline(store: Arc<VectorStore>, config: &Config) -> IngestionPipeline {
    IngestionPipeline::new(store, Arc::new(HashEmbedder), config)
}
