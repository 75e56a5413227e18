//! Hybrid search: dense cosine similarity fused with sparse BM25.
//!
//! The engine supports four modes. `Semantic` ranks purely by cosine
//! similarity of embeddings, `Keyword` purely by BM25 over chunk text,
//! `Hybrid` fuses both over the union of each arm's top candidates, and
//! `Context` runs a hybrid search and then widens each hit with its
//! ordinal neighbors. Every mode is deterministic for a fixed index and
//! query: score ties are broken by lower ordinal, then chunk id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, SearchHit};
use crate::store::VectorStore;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// How many candidates each arm contributes to hybrid fusion, as a
/// multiple of the requested `k`.
const CANDIDATE_FACTOR: usize = 3;

/// Ranking strategy for a search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
    /// Hybrid search followed by ordinal-neighbor expansion.
    Context,
}

/// Search-time tunables, taken from [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Weight of the semantic arm in hybrid fusion, in `[0, 1]`.
    pub hybrid_weight: f64,
    /// Result count when the caller does not pass one.
    pub default_top_k: usize,
    /// Neighboring chunks fetched on each side in `Context` mode.
    pub context_window: u32,
}

impl From<&RetrievalConfig> for SearchOptions {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            hybrid_weight: cfg.hybrid_weight,
            default_top_k: cfg.default_top_k,
            context_window: cfg.context_window,
        }
    }
}

pub struct HybridSearchEngine {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    options: SearchOptions,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        options: SearchOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Hybrid search with the configured default result count.
    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search(query, self.options.default_top_k, SearchMode::Hybrid)
            .await
    }

    /// Run a query in the given mode, returning at most `k` ranked hits.
    ///
    /// An empty index yields an empty result set, not an error; the caller
    /// asked a question a blank corpus cannot answer, which is not a fault.
    pub async fn search(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        if k == 0 || self.store.is_empty() {
            return Ok(Vec::new());
        }

        let hits = match mode {
            SearchMode::Semantic => self.semantic(query, k).await?,
            SearchMode::Keyword => self.keyword(query, k),
            SearchMode::Hybrid => self.hybrid(query, k).await?,
            SearchMode::Context => {
                let base = self.hybrid(query, k).await?;
                self.expand_context(base, self.options.context_window)
            }
        };

        tracing::debug!(query, ?mode, hits = hits.len(), "search complete");
        Ok(hits)
    }

    async fn semantic(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_query(query).await?;
        let ranked = match self.store.search_vectors(&vector, k) {
            Ok(ranked) => ranked,
            Err(RetrievalError::EmptyIndex) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (chunk, score))| SearchHit {
                chunk,
                semantic_score: score,
                keyword_score: 0.0,
                hybrid_score: score,
                rank,
            })
            .collect())
    }

    /// Chunks containing none of the query terms are dropped, not ranked
    /// at zero, so a query with no corpus matches returns an empty list.
    fn keyword(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut scored = self.store.read_chunks(|chunks| {
            let scorer = Bm25Scorer::build(chunks);
            chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| (chunk.clone(), scorer.score(i, &query_tokens)))
                .filter(|(_, score)| *score > 0.0)
                .collect::<Vec<_>>()
        });

        sort_ranked(&mut scored);
        scored.truncate(k);

        scored
            .into_iter()
            .enumerate()
            .map(|(rank, (chunk, score))| SearchHit {
                chunk,
                semantic_score: 0.0,
                keyword_score: score,
                hybrid_score: score,
                rank,
            })
            .collect()
    }

    /// Fuse both arms over the union of each arm's top candidates.
    ///
    /// Each arm's scores are min-max normalized over its own candidate set
    /// before the weighted sum, so neither raw scale dominates. A chunk
    /// surfaced by only one arm scores zero on the other.
    async fn hybrid(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let pool = k.saturating_mul(CANDIDATE_FACTOR).max(k);

        let semantic = self.semantic(query, pool).await?;
        let keyword = self.keyword(query, pool);

        let mut semantic_scores: HashMap<String, f64> = semantic
            .iter()
            .map(|h| (h.chunk.id.clone(), h.semantic_score))
            .collect();
        let mut keyword_scores: HashMap<String, f64> = keyword
            .iter()
            .map(|h| (h.chunk.id.clone(), h.keyword_score))
            .collect();
        normalize_scores(&mut semantic_scores);
        normalize_scores(&mut keyword_scores);

        let mut union: BTreeMap<String, Chunk> = BTreeMap::new();
        for hit in semantic.into_iter().chain(keyword) {
            union.entry(hit.chunk.id.clone()).or_insert(hit.chunk);
        }

        let w = self.options.hybrid_weight;
        let mut fused: Vec<(Chunk, f64, f64)> = union
            .into_values()
            .map(|chunk| {
                let s = semantic_scores.get(&chunk.id).copied().unwrap_or(0.0);
                let kw = keyword_scores.get(&chunk.id).copied().unwrap_or(0.0);
                (chunk, s, kw)
            })
            .collect();

        let mut ranked: Vec<(Chunk, f64)> = fused
            .drain(..)
            .map(|(chunk, s, kw)| {
                let hybrid = w * s + (1.0 - w) * kw;
                (chunk, hybrid)
            })
            .collect();
        sort_ranked(&mut ranked);
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (chunk, hybrid))| {
                let semantic_score = semantic_scores.get(&chunk.id).copied().unwrap_or(0.0);
                let keyword_score = keyword_scores.get(&chunk.id).copied().unwrap_or(0.0);
                SearchHit {
                    chunk,
                    semantic_score,
                    keyword_score,
                    hybrid_score: hybrid,
                    rank,
                }
            })
            .collect())
    }

    /// Widen each hit with a symmetric window of ordinal neighbors from
    /// the same document, deduplicated, keeping anchors in rank order.
    ///
    /// Neighbors inherit their anchor's `hybrid_score` so they stay
    /// adjacent through any downstream re-sort, with both arm scores
    /// zeroed to mark them as context rather than matches.
    pub fn expand_context(&self, hits: Vec<SearchHit>, window: u32) -> Vec<SearchHit> {
        if window == 0 {
            return hits;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut expanded: Vec<SearchHit> = Vec::new();
        for hit in hits {
            let start = hit.chunk.ordinal.saturating_sub(window);
            let end = hit.chunk.ordinal.saturating_add(window);
            let neighbors = self.store.get_chunk_range(&hit.chunk.document_id, start, end);
            for neighbor in neighbors {
                if !seen.insert(neighbor.id.clone()) {
                    continue;
                }
                if neighbor.id == hit.chunk.id {
                    expanded.push(SearchHit {
                        rank: expanded.len(),
                        ..hit.clone()
                    });
                } else {
                    expanded.push(SearchHit {
                        chunk: neighbor,
                        semantic_score: 0.0,
                        keyword_score: 0.0,
                        hybrid_score: hit.hybrid_score,
                        rank: expanded.len(),
                    });
                }
            }
        }
        expanded
    }
}

/// Lowercased alphanumeric terms.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// BM25 over the chunk corpus, built fresh per query under the store's
/// read lock so term statistics always match the index being searched.
struct Bm25Scorer {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avgdl: f64,
    corpus_size: usize,
}

impl Bm25Scorer {
    fn build(chunks: &[Chunk]) -> Self {
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let corpus_size = chunks.len();
        let total: usize = doc_lens.iter().sum();
        let avgdl = if corpus_size == 0 {
            0.0
        } else {
            total as f64 / corpus_size as f64
        };

        Self {
            term_freqs,
            doc_lens,
            doc_freq,
            avgdl,
            corpus_size,
        }
    }

    fn score(&self, index: usize, query_tokens: &[String]) -> f64 {
        if self.avgdl == 0.0 {
            return 0.0;
        }
        let freqs = &self.term_freqs[index];
        let dl = self.doc_lens[index] as f64;
        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * dl / self.avgdl);

        query_tokens
            .iter()
            .map(|term| {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf =
                    (((self.corpus_size as f64 - df + 0.5) / (df + 0.5)) + 1.0).ln();
                idf * (tf * (BM25_K1 + 1.0)) / (tf + norm)
            })
            .sum()
    }
}

/// Min-max normalize a score map in place. A degenerate set where every
/// score is equal maps to 1.0 when positive and 0.0 otherwise.
fn normalize_scores(scores: &mut HashMap<String, f64>) {
    if scores.is_empty() {
        return;
    }
    let min = scores.values().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for score in scores.values_mut() {
        if range > f64::EPSILON {
            *score = (*score - min) / range;
        } else {
            *score = if max > 0.0 { 1.0 } else { 0.0 };
        }
    }
}

/// Descending by score; ties by lower ordinal, then chunk id.
fn sort_ranked(ranked: &mut [(Chunk, f64)]) {
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.ordinal.cmp(&b.0.ordinal))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
}
