//! Adaptive multi-query retrieval.
//!
//! Runs an ordered set of related queries through hybrid search, merges
//! the per-query result sets by chunk id, and re-ranks under a single
//! global result budget. A chunk surfaced by several queries keeps its
//! best score and remembers every query that found it.

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{RetrievedChunk, SearchHit};
use crate::search::{HybridSearchEngine, SearchMode};

pub struct AdaptiveRetriever {
    engine: HybridSearchEngine,
}

impl AdaptiveRetriever {
    pub fn new(engine: HybridSearchEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &HybridSearchEngine {
        &self.engine
    }

    /// Retrieve at most `total_k` chunks across all `queries`.
    ///
    /// Each query requests an equal share of the budget (rounded up, so
    /// the merged pool slightly overshoots before truncation). Duplicate
    /// chunks keep the highest `hybrid_score`; contributing queries are
    /// recorded in query order.
    pub async fn retrieve(&self, queries: &[String], total_k: usize) -> Result<Vec<RetrievedChunk>> {
        if queries.is_empty() || total_k == 0 {
            return Ok(Vec::new());
        }

        let share = total_k.div_ceil(queries.len());
        let mut merged: HashMap<String, RetrievedChunk> = HashMap::new();

        for query in queries {
            let hits = self.engine.search(query, share, SearchMode::Hybrid).await?;
            for hit in hits {
                merge_hit(&mut merged, hit, query);
            }
        }

        let mut ranked: Vec<RetrievedChunk> = merged.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        ranked.truncate(total_k);

        tracing::debug!(
            queries = queries.len(),
            total_k,
            returned = ranked.len(),
            "adaptive retrieval complete"
        );
        Ok(ranked)
    }

    /// [`retrieve`](Self::retrieve), then one context expansion pass over
    /// the merged set. Expanding after the merge keeps the expansion cost
    /// independent of how many queries were issued.
    pub async fn retrieve_expanded(
        &self,
        queries: &[String],
        total_k: usize,
        window: u32,
    ) -> Result<Vec<RetrievedChunk>> {
        let merged = self.retrieve(queries, total_k).await?;
        if window == 0 {
            return Ok(merged);
        }

        let hits: Vec<SearchHit> = merged
            .iter()
            .enumerate()
            .map(|(rank, rc)| SearchHit {
                chunk: rc.chunk.clone(),
                semantic_score: 0.0,
                keyword_score: 0.0,
                hybrid_score: rc.score,
                rank,
            })
            .collect();
        let expanded = self.engine.expand_context(hits, window);

        let queries_by_id: HashMap<&str, &Vec<String>> = merged
            .iter()
            .map(|rc| (rc.chunk.id.as_str(), &rc.queries))
            .collect();

        Ok(expanded
            .into_iter()
            .map(|hit| {
                let queries = queries_by_id
                    .get(hit.chunk.id.as_str())
                    .map(|q| (*q).clone())
                    .unwrap_or_default();
                RetrievedChunk {
                    chunk: hit.chunk,
                    score: hit.hybrid_score,
                    queries,
                }
            })
            .collect())
    }
}

fn merge_hit(merged: &mut HashMap<String, RetrievedChunk>, hit: SearchHit, query: &str) {
    match merged.get_mut(&hit.chunk.id) {
        Some(existing) => {
            if hit.hybrid_score > existing.score {
                existing.score = hit.hybrid_score;
            }
            if !existing.queries.iter().any(|q| q == query) {
                existing.queries.push(query.to_string());
            }
        }
        None => {
            merged.insert(
                hit.chunk.id.clone(),
                RetrievedChunk {
                    chunk: hit.chunk,
                    score: hit.hybrid_score,
                    queries: vec![query.to_string()],
                },
            );
        }
    }
}
