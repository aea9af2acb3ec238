//! Persistent vector index.
//!
//! Wraps the core [`FlatIndex`] with an embedding provider, a JSON file
//! under `knowledge_base/vector_index/`, and a `tokio` read/write lock.
//! Mutations embed before taking the write lock; the lock covers only
//! the swap and the write to disk.
//!
//! Startup never fails because of the index: a missing, corrupt or
//! incompatible file degrades to a fresh placeholder-only index.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use casegen_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use casegen_core::index::{FlatIndex, IndexEntry, SearchHit};
use casegen_core::models::DocumentChunk;

const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    model: String,
    dims: usize,
    placeholder: bool,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk: DocumentChunk,
    /// Little-endian f32 bytes, base64 encoded.
    vector: String,
}

/// Counts reported by [`VectorIndex::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub index_exists: bool,
    /// Real entries; 0 when only the placeholder is present.
    pub document_count: usize,
    /// Literal entries, placeholder included.
    pub entry_count: usize,
    pub model: String,
    pub dims: usize,
}

pub struct VectorIndex {
    dir: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    inner: RwLock<FlatIndex>,
}

impl VectorIndex {
    /// Load the persisted index from `dir`, or start a placeholder index.
    pub async fn initialize(dir: impl Into<PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dir = dir.into();
        let path = dir.join(INDEX_FILE);
        let index = if path.exists() {
            match load(&path, provider.as_ref()).await {
                Ok(index) => {
                    info!(
                        path = %path.display(),
                        documents = index.document_count(),
                        "loaded vector index"
                    );
                    index
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "vector index unusable, starting empty");
                    FlatIndex::with_placeholder(provider.dims())
                }
            }
        } else {
            debug!(path = %path.display(), "no vector index on disk, starting empty");
            FlatIndex::with_placeholder(provider.dims())
        };

        let this = Self {
            dir,
            provider,
            inner: RwLock::new(index),
        };
        if !this.index_exists() {
            let guard = this.inner.read().await;
            if let Err(e) = this.persist(&guard).await {
                warn!(error = %format!("{:#}", e), "failed to write placeholder vector index");
            }
        }
        this
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn index_exists(&self) -> bool {
        self.path().exists()
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    async fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        self.provider
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed {} chunks", chunks.len()))
    }

    /// Embed and merge `chunks`, replacing the placeholder if it is all the
    /// index holds. Returns the number of entries added.
    pub async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed_chunks(&chunks).await?;

        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        let added = next.add(chunks, vectors)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(added)
    }

    /// Replace the whole index with `chunks`. The file on disk is removed
    /// first; an empty batch leaves a placeholder-only index.
    pub async fn replace_all(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let vectors = self.embed_chunks(&chunks).await?;

        let mut guard = self.inner.write().await;
        let path = self.path();
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        let mut next = FlatIndex::with_placeholder(self.provider.dims());
        let added = next.replace_all(chunks, vectors)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(added)
    }

    /// Nearest `k` entries to `query`, ascending by distance.
    ///
    /// Returns immediately, without embedding, when the index is empty.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }
        let vector = self
            .provider
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        let guard = self.inner.read().await;
        Ok(guard.search(&vector, k))
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn document_count(&self) -> usize {
        self.inner.read().await.document_count()
    }

    pub async fn sources(&self) -> BTreeSet<String> {
        self.inner.read().await.sources()
    }

    pub async fn status(&self) -> IndexStats {
        let guard = self.inner.read().await;
        IndexStats {
            index_exists: self.index_exists(),
            document_count: guard.document_count(),
            entry_count: guard.len(),
            model: self.provider.model_name().to_string(),
            dims: guard.dims(),
        }
    }

    /// Write `index` to disk via a temp file and rename.
    async fn persist(&self, index: &FlatIndex) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            model: self.provider.model_name().to_string(),
            dims: index.dims(),
            placeholder: index.is_placeholder(),
            entries: index
                .entries()
                .iter()
                .map(|e| PersistedEntry {
                    chunk: e.chunk.clone(),
                    vector: STANDARD.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        };
        let json = serde_json::to_vec(&persisted)?;

        let path = self.path();
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move index into place at {}", path.display()))?;
        Ok(())
    }
}

async fn load(path: &Path, provider: &dyn EmbeddingProvider) -> Result<FlatIndex> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let persisted: PersistedIndex =
        serde_json::from_slice(&bytes).context("Failed to parse vector index")?;

    if persisted.version != FORMAT_VERSION {
        bail!("unsupported vector index version {}", persisted.version);
    }
    if persisted.model != provider.model_name() || persisted.dims != provider.dims() {
        bail!(
            "index was built with {} ({} dims) but the provider is {} ({} dims); run a rebuild",
            persisted.model,
            persisted.dims,
            provider.model_name(),
            provider.dims()
        );
    }

    let mut entries = Vec::with_capacity(persisted.entries.len());
    for entry in persisted.entries {
        let blob = STANDARD
            .decode(entry.vector.as_bytes())
            .context("Failed to decode stored vector")?;
        entries.push(IndexEntry {
            chunk: entry.chunk,
            vector: blob_to_vec(&blob),
        });
    }
    FlatIndex::from_parts(persisted.dims, entries, persisted.placeholder)
}
