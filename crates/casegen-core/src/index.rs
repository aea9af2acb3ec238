//! Flat (exhaustive) vector index with placeholder semantics.
//!
//! A freshly created index holds a single placeholder entry so that
//! persisted indexes are never a degenerate empty collection. The
//! placeholder is tracked by an explicit flag rather than recognised by its
//! content: it is replaced outright by the first real [`add`](FlatIndex::add),
//! never appears in search results, and is not counted by
//! [`document_count`](FlatIndex::document_count).
//!
//! Search is a linear scan by Euclidean distance between unit vectors.
//! Distances are turned into a bounded percentage by
//! [`similarity_percentage`].

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::{is_zero, l2_distance, normalize};
use crate::models::DocumentChunk;

pub const PLACEHOLDER_SOURCE: &str = "__init__";
pub const PLACEHOLDER_CONTENT: &str = "knowledge base initialized";

/// Default distance at which similarity saturates to 0%.
pub const DEFAULT_SATURATION: f32 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

/// A nearest-neighbour result, ascending by `distance`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    entries: Vec<IndexEntry>,
    placeholder: bool,
}

impl FlatIndex {
    /// A placeholder-only index.
    pub fn with_placeholder(dims: usize) -> Self {
        Self {
            dims,
            entries: vec![IndexEntry {
                chunk: DocumentChunk::new(PLACEHOLDER_CONTENT, PLACEHOLDER_SOURCE),
                vector: vec![0.0; dims],
            }],
            placeholder: true,
        }
    }

    /// Reassemble an index from persisted parts, checking dimensionality.
    pub fn from_parts(dims: usize, entries: Vec<IndexEntry>, placeholder: bool) -> Result<Self> {
        if placeholder && entries.len() != 1 {
            bail!(
                "placeholder index must hold exactly one entry, found {}",
                entries.len()
            );
        }
        if !placeholder && entries.is_empty() {
            bail!("index without placeholder must hold at least one entry");
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dims) {
            bail!(
                "vector for {} has {} dims, index expects {}",
                bad.chunk.metadata.source,
                bad.vector.len(),
                dims
            );
        }
        Ok(Self {
            dims,
            entries,
            placeholder,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// True when the index holds no real entries.
    pub fn is_empty(&self) -> bool {
        self.placeholder || self.entries.is_empty()
    }

    /// Literal entry count, including the placeholder.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of real entries; 0 for a placeholder-only index.
    pub fn document_count(&self) -> usize {
        if self.placeholder {
            0
        } else {
            self.entries.len()
        }
    }

    /// Insert chunks with their vectors, replacing the placeholder if present.
    ///
    /// Returns the number of entries added.
    pub fn add(&mut self, chunks: Vec<DocumentChunk>, vectors: Vec<Vec<f32>>) -> Result<usize> {
        self.check_batch(&chunks, &vectors)?;
        if chunks.is_empty() {
            return Ok(0);
        }
        if self.placeholder {
            self.entries.clear();
            self.placeholder = false;
        }
        let added = chunks.len();
        for (chunk, mut vector) in chunks.into_iter().zip(vectors) {
            normalize(&mut vector);
            self.entries.push(IndexEntry { chunk, vector });
        }
        Ok(added)
    }

    /// Swap the whole contents for a new batch. An empty batch resets the
    /// index to placeholder-only.
    pub fn replace_all(
        &mut self,
        chunks: Vec<DocumentChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize> {
        self.check_batch(&chunks, &vectors)?;
        *self = Self::with_placeholder(self.dims);
        self.add(chunks, vectors)
    }

    fn check_batch(&self, chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
            bail!(
                "embedding has {} dims, index expects {}",
                v.len(),
                self.dims
            );
        }
        if chunks.iter().any(|c| c.content.trim().is_empty()) {
            bail!("refusing to index an empty chunk");
        }
        Ok(())
    }

    /// Return up to `k` nearest entries to `query`, ascending by distance.
    ///
    /// The placeholder is never returned, and a zero query vector (text
    /// with no features) matches nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if self.is_empty() || k == 0 || query.len() != self.dims || is_zero(query) {
            return Vec::new();
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, l2_distance(&q, &e.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, distance)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                distance,
            })
            .collect()
    }

    /// Distinct sources present in the index.
    pub fn sources(&self) -> BTreeSet<String> {
        if self.placeholder {
            return BTreeSet::new();
        }
        self.entries
            .iter()
            .map(|e| e.chunk.metadata.source.clone())
            .collect()
    }
}

/// Map a distance between unit vectors to a percentage in `[0, 100]`.
///
/// `100 × (1 − (d / saturation)²)`, clamped: distance 0 gives 100 and every
/// distance at or beyond `saturation` gives 0.
pub fn similarity_percentage(distance: f32, saturation: f32) -> f64 {
    if distance.is_nan() || saturation <= 0.0 {
        return 0.0;
    }
    let ratio = f64::from(distance.max(0.0)) / f64::from(saturation);
    (100.0 * (1.0 - ratio * ratio)).clamp(0.0, 100.0)
}
