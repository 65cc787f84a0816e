//! In-memory vector index over chunks.
//!
//! The index is built in partial pieces (one per embedding batch) and
//! combined with [`VectorIndex::merge`]. Entries are keyed by chunk id in a
//! `BTreeMap`, so merging is a set union: the result does not depend on the
//! order or grouping in which partial indexes are merged. When the same
//! chunk id appears on both sides the source statement ids are unioned.
//!
//! Search is brute-force cosine similarity, which is plenty for a corpus of
//! a few thousand chunks.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::embedding::cosine_similarity;
use crate::models::Chunk;

/// One indexed chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A similarity hit from [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub entry: &'a IndexEntry,
    pub similarity: f32,
}

/// Chunks plus vectors, queryable by similarity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    entries: BTreeMap<String, IndexEntry>,
    dims: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a partial index from one embedding batch.
    ///
    /// Fails when the two slices differ in length or the vectors do not all
    /// share one dimensionality.
    pub fn from_batch(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "batch has {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let mut index = Self::new();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            index.insert(IndexEntry { chunk, vector })?;
        }
        Ok(index)
    }

    /// Insert one entry, unioning source ids on id collision.
    pub fn insert(&mut self, entry: IndexEntry) -> Result<()> {
        match self.dims {
            Some(d) if d != entry.vector.len() => bail!(
                "vector for chunk {} has {} dims, index has {}",
                entry.chunk.id,
                entry.vector.len(),
                d
            ),
            None => self.dims = Some(entry.vector.len()),
            _ => {}
        }

        match self.entries.get_mut(&entry.chunk.id) {
            Some(existing) => {
                let ids = &mut existing.chunk.source_statement_ids;
                ids.extend(entry.chunk.source_statement_ids);
                ids.sort();
                ids.dedup();
            }
            None => {
                let mut entry = entry;
                entry.chunk.source_statement_ids.sort();
                entry.chunk.source_statement_ids.dedup();
                self.entries.insert(entry.chunk.id.clone(), entry);
            }
        }
        Ok(())
    }

    /// Union of two indexes.
    pub fn merge(mut self, other: VectorIndex) -> Result<Self> {
        for (_, entry) in other.entries {
            self.insert(entry)?;
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimensionality, or `None` for an empty index.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Entries in chunk-id order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&IndexEntry> {
        self.entries.get(chunk_id)
    }

    /// Top `limit` entries by cosine similarity to `query`, best first.
    /// Ties are broken by chunk id so results are stable.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<Candidate<'_>> {
        let mut hits: Vec<Candidate<'_>> = self
            .entries
            .values()
            .map(|entry| Candidate {
                entry,
                similarity: cosine_similarity(query, &entry.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.chunk.id.cmp(&b.entry.chunk.id))
        });
        hits.truncate(limit);
        hits
    }
}
