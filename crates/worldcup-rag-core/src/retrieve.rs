//! Similarity retrieval with maximal-marginal-relevance diversification.
//!
//! # Algorithm
//!
//! 1. Fetch the `fetch_k` most similar chunks from the [`VectorIndex`].
//! 2. Drop candidates whose similarity is below `score_threshold`.
//! 3. Greedily pick up to `k` chunks. The first pick is the most similar
//!    candidate; each later pick maximizes
//!    `λ × sim(query, c) − (1 − λ) × max sim(c, selected)`.
//!
//! With `λ = 1.0` this degenerates to plain top-k; lower values trade
//! relevance for diversity, which keeps near-duplicate phrasings of the same
//! fact from crowding the prompt context.

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::index::{Candidate, VectorIndex};
use crate::models::Chunk;

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Number of chunks returned.
    pub k: usize,
    /// Number of similarity candidates considered before MMR.
    pub fetch_k: usize,
    /// Relevance weight in `[0, 1]`.
    pub lambda: f32,
    /// Minimum similarity for a candidate to be kept.
    pub score_threshold: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: 8,
            fetch_k: 32,
            lambda: 0.7,
            score_threshold: 0.0,
        }
    }
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Retrieve up to `params.k` diverse, relevant chunks for `query`.
pub fn retrieve(index: &VectorIndex, query: &[f32], params: &RetrievalParams) -> Vec<ScoredChunk> {
    if params.k == 0 {
        return Vec::new();
    }

    let fetch = params.fetch_k.max(params.k);
    let mut pool: Vec<Candidate<'_>> = index
        .search(query, fetch)
        .into_iter()
        .filter(|c| c.similarity >= params.score_threshold)
        .collect();

    let lambda = params.lambda.clamp(0.0, 1.0);
    let mut selected: Vec<Candidate<'_>> = Vec::with_capacity(params.k.min(pool.len()));

    while selected.len() < params.k && !pool.is_empty() {
        let best = if selected.is_empty() {
            // pool is sorted by similarity already
            0
        } else {
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (i, cand) in pool.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|s| cosine_similarity(&cand.entry.vector, &s.entry.vector))
                    .fold(f32::NEG_INFINITY, f32::max);
                let score = lambda * cand.similarity - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best = i;
                }
            }
            best
        };
        selected.push(pool.remove(best));
    }

    selected
        .into_iter()
        .map(|c| ScoredChunk {
            chunk: c.entry.chunk.clone(),
            similarity: c.similarity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Granularity;

    fn index(items: &[(&str, [f32; 2])]) -> VectorIndex {
        let chunks = items
            .iter()
            .map(|(id, _)| Chunk {
                id: id.to_string(),
                text: id.to_string(),
                source_statement_ids: vec![],
                granularity: Granularity::Small,
                byte_length: id.len(),
                offset: 0,
                overlap: 0,
            })
            .collect();
        let vecs = items.iter().map(|(_, v)| v.to_vec()).collect();
        VectorIndex::from_batch(chunks, vecs).unwrap()
    }

    fn ids(hits: &[ScoredChunk]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.id.as_str()).collect()
    }

    fn params(k: usize, lambda: f32, threshold: f32) -> RetrievalParams {
        RetrievalParams {
            k,
            fetch_k: 10,
            lambda,
            score_threshold: threshold,
        }
    }

    #[test]
    fn test_first_pick_is_most_similar() {
        let idx = index(&[("a", [0.6, 0.8]), ("b", [1.0, 0.0]), ("c", [0.0, 1.0])]);
        let hits = retrieve(&idx, &[1.0, 0.0], &params(1, 0.3, 0.0));
        assert_eq!(ids(&hits), vec!["b"]);
    }

    #[test]
    fn test_lambda_one_is_top_k() {
        let idx = index(&[("a", [1.0, 0.0]), ("a2", [0.99, 0.01]), ("c", [0.0, 1.0])]);
        let hits = retrieve(&idx, &[1.0, 0.0], &params(2, 1.0, -1.0));
        assert_eq!(ids(&hits), vec!["a", "a2"]);
    }

    #[test]
    fn test_low_lambda_prefers_diversity() {
        let idx = index(&[("a", [1.0, 0.0]), ("a2", [0.99, 0.01]), ("c", [0.6, 0.8])]);
        let hits = retrieve(&idx, &[1.0, 0.0], &params(2, 0.3, -1.0));
        assert_eq!(ids(&hits), vec!["a", "c"]);
    }

    #[test]
    fn test_threshold_filters() {
        let idx = index(&[("a", [1.0, 0.0]), ("c", [0.0, 1.0])]);
        let hits = retrieve(&idx, &[1.0, 0.0], &params(5, 0.7, 0.5));
        assert_eq!(ids(&hits), vec!["a"]);
        assert!(hits[0].similarity >= 0.5);
    }

    #[test]
    fn test_k_larger_than_index() {
        let idx = index(&[("a", [1.0, 0.0]), ("c", [0.0, 1.0])]);
        assert_eq!(retrieve(&idx, &[1.0, 0.0], &params(10, 0.7, -1.0)).len(), 2);
    }

    #[test]
    fn test_k_zero_and_empty_index() {
        let idx = index(&[("a", [1.0, 0.0])]);
        assert!(retrieve(&idx, &[1.0, 0.0], &params(0, 0.7, 0.0)).is_empty());
        assert!(retrieve(&VectorIndex::new(), &[1.0, 0.0], &params(3, 0.7, 0.0)).is_empty());
    }
}
