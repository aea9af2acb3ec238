//! Knowledge base service.
//!
//! The ingestion and query façade over the [`VectorIndex`]: files are
//! extracted by type, chunked (prose by size, spreadsheets by row),
//! embedded and indexed. Queries come back with a similarity percentage
//! and can be filtered by a floor.
//!
//! Files and index are allowed to drift apart: deleting a knowledge file
//! or a failed ingestion leaves the index as it was, and
//! [`KnowledgeBase::rebuild_index`] is the repair.
//! [`KnowledgeBase::get_index_status`] reports the drift.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use casegen_core::chunk::{chunk_rows, chunk_text};
use casegen_core::embedding::EmbeddingProvider;
use casegen_core::index::similarity_percentage;
use casegen_core::models::{ChunkMetadata, DocumentChunk};

use crate::config::{ChunkingConfig, Config, RetrievalConfig};
use crate::extract::{Extracted, ExtractorRegistry};
use crate::index::VectorIndex;

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub similarity: f64,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub path: PathBuf,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<IngestReport>,
    pub failed: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub files: usize,
    pub indexed_files: usize,
    pub chunks: usize,
    pub failed: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStatus {
    pub index_exists: bool,
    /// Real index entries; 0 when only the placeholder is present.
    pub document_count: usize,
    /// Knowledge files present on disk.
    pub file_count: usize,
    pub indexed_sources: Vec<String>,
    /// Files on disk with no entries in the index.
    pub unindexed_files: Vec<String>,
    /// Index sources whose file no longer exists.
    pub orphaned_sources: Vec<String>,
    pub model: String,
    pub dims: usize,
}

impl KnowledgeStatus {
    pub fn has_drift(&self) -> bool {
        !self.unindexed_files.is_empty() || !self.orphaned_sources.is_empty()
    }

    /// Drift between files, index and the `file_records` rows tracking
    /// the files.
    pub fn drifts_from_records(&self, file_records: i64) -> bool {
        self.has_drift() || usize::try_from(file_records).ok() != Some(self.file_count)
    }
}

pub struct KnowledgeBase {
    files_dir: PathBuf,
    retrieval: RetrievalConfig,
    chunker: FileChunker,
    index: VectorIndex,
}

/// Extraction and chunking settings, cloned into blocking tasks.
#[derive(Clone)]
struct FileChunker {
    extractors: ExtractorRegistry,
    chunking: ChunkingConfig,
}

impl FileChunker {
    fn chunks_for(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let source = file_name(path);
        let extracted = self
            .extractors
            .extract(path)
            .with_context(|| format!("Failed to extract {}", source))?;
        let chunks = match extracted {
            Extracted::Rows(sheets) => chunk_rows(&sheets, &source, self.chunking.rows_per_chunk),
            Extracted::Text(text) => chunk_text(
                &text,
                &source,
                self.chunking.chunk_size,
                self.chunking.chunk_overlap,
            ),
        };
        Ok(chunks)
    }

    /// Chunk every file in `dir`, collecting per-file failures.
    fn chunk_dir(&self, dir: &Path) -> DirChunks {
        let files = knowledge_files(dir);
        let mut out = DirChunks {
            files: files.len(),
            ..DirChunks::default()
        };
        for path in &files {
            match self.chunks_for(path) {
                Ok(c) if c.is_empty() => out.failed.push(FileFailure {
                    file: file_name(path),
                    error: "no text to index".to_string(),
                }),
                Ok(c) => {
                    out.indexed_files += 1;
                    out.chunks.extend(c);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %format!("{:#}", e), "skipping file during rebuild");
                    out.failed.push(FileFailure {
                        file: file_name(path),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        out
    }
}

#[derive(Default)]
struct DirChunks {
    files: usize,
    indexed_files: usize,
    chunks: Vec<DocumentChunk>,
    failed: Vec<FileFailure>,
}

fn knowledge_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl KnowledgeBase {
    pub async fn open(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.ensure_dirs()?;
        let index = VectorIndex::initialize(config.vector_index_dir(), provider).await;
        Ok(Self {
            files_dir: config.knowledge_files_dir(),
            retrieval: config.retrieval.clone(),
            chunker: FileChunker {
                extractors: ExtractorRegistry::default(),
                chunking: config.chunking.clone(),
            },
            index,
        })
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.chunker.extractors
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Extract and chunk one file on the blocking pool.
    pub async fn chunks_for(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let chunker = self.chunker.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || chunker.chunks_for(&path))
            .await
            .context("Extraction task failed")?
    }

    /// Chunk `path` and merge it into the index.
    pub async fn add_document(&self, path: &Path) -> Result<IngestReport> {
        let chunks = self.chunks_for(path).await?;
        let source = file_name(path);
        if chunks.is_empty() {
            bail!("{} contains no text to index", source);
        }
        let added = self
            .index
            .add(chunks)
            .await
            .with_context(|| format!("Failed to index {}", source))?;
        info!(source = %source, chunks = added, "indexed knowledge file");
        Ok(IngestReport {
            source,
            path: path.to_path_buf(),
            chunks: added,
        })
    }

    /// Copy `src` into the knowledge files directory and index it.
    ///
    /// Unsupported types are rejected before anything is copied. The copy
    /// is kept when indexing fails; status reports it as unindexed and a
    /// rebuild retries it.
    pub async fn add_file(&self, src: &Path) -> Result<IngestReport> {
        if !self.extractors().supports(src) {
            bail!(
                "Unsupported file type: {} (supported: {})",
                file_name(src),
                self.extractors().tags().join(", ")
            );
        }
        let dest = self.files_dir.join(file_name(src));
        let already_there = match (src.canonicalize(), dest.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !already_there {
            tokio::fs::create_dir_all(&self.files_dir).await?;
            tokio::fs::copy(src, &dest)
                .await
                .with_context(|| format!("Failed to copy {} into the knowledge base", src.display()))?;
        }
        self.add_document(&dest).await
    }

    /// Ingest several files. A failing file never stops the others.
    pub async fn add_files(&self, paths: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();
        for path in paths {
            match self.add_file(path).await {
                Ok(ingested) => report.succeeded.push(ingested),
                Err(e) => {
                    warn!(file = %path.display(), error = %format!("{:#}", e), "knowledge file ingestion failed");
                    report.failed.push(FileFailure {
                        file: file_name(path),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }

    /// Up to `k` hits for `query`, most similar first, dropping anything
    /// under `min_similarity` percent. `k` is capped at `max_candidates`.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        min_similarity: Option<f64>,
    ) -> Result<Vec<KnowledgeHit>> {
        let k = k.min(self.retrieval.max_candidates);
        if k == 0 || query.trim().is_empty() || self.index.is_empty().await {
            return Ok(Vec::new());
        }
        let candidates = k.saturating_mul(2).min(self.retrieval.max_candidates).max(k);
        let raw = self.index.search(query, candidates).await?;

        let floor = min_similarity.unwrap_or(0.0);
        let saturation = self.retrieval.similarity_saturation;
        let mut hits: Vec<KnowledgeHit> = raw
            .into_iter()
            .map(|hit| KnowledgeHit {
                similarity: similarity_percentage(hit.distance, saturation),
                distance: hit.distance,
                content: hit.chunk.content,
                metadata: hit.chunk.metadata,
            })
            .filter(|hit| hit.similarity >= floor)
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }

    /// Retrieve for several queries and fuse the results into one
    /// numbered reference block, or `None` when nothing clears the floor.
    ///
    /// Duplicate chunks keep their best similarity. The block stops
    /// growing once `grounding_max_chars` is reached.
    pub async fn grounding_context(&self, queries: &[String], k: usize) -> Result<Option<String>> {
        let mut best: HashMap<String, KnowledgeHit> = HashMap::new();
        for query in queries.iter().filter(|q| !q.trim().is_empty()) {
            for hit in self
                .search(query, k, Some(self.retrieval.min_similarity))
                .await?
            {
                match best.get(&hit.content) {
                    Some(existing) if existing.similarity >= hit.similarity => {}
                    _ => {
                        best.insert(hit.content.clone(), hit);
                    }
                }
            }
        }
        if best.is_empty() {
            return Ok(None);
        }

        let mut fused: Vec<KnowledgeHit> = best.into_values().collect();
        fused.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.content.cmp(&b.content))
        });

        let mut out = String::new();
        for (i, hit) in fused.iter().enumerate() {
            let entry = format!(
                "[{}] source: {} (similarity {:.1}%)\n{}\n\n",
                i + 1,
                hit.metadata.source,
                hit.similarity,
                hit.content
            );
            if !out.is_empty() && out.len() + entry.len() > self.retrieval.grounding_max_chars {
                break;
            }
            out.push_str(&entry);
        }
        Ok(Some(out.trim_end().to_string()))
    }

    /// Re-extract, re-chunk and re-embed every knowledge file and replace
    /// the index with the result. No files leaves a placeholder-only index.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        let chunker = self.chunker.clone();
        let dir = self.files_dir.clone();
        let DirChunks {
            files,
            indexed_files,
            chunks,
            failed,
        } = tokio::task::spawn_blocking(move || chunker.chunk_dir(&dir))
            .await
            .context("Rebuild extraction task failed")?;

        let count = self
            .index
            .replace_all(chunks)
            .await
            .context("Failed to rebuild vector index")?;
        info!(files, chunks = count, failed = failed.len(), "rebuilt vector index");

        Ok(RebuildReport {
            files,
            indexed_files,
            chunks: count,
            failed,
        })
    }

    pub async fn get_index_status(&self) -> Result<KnowledgeStatus> {
        let stats = self.index.status().await;
        let dir = self.files_dir.clone();
        let on_disk: BTreeSet<String> = tokio::task::spawn_blocking(move || {
            knowledge_files(&dir).iter().map(|p| file_name(p)).collect()
        })
        .await
        .context("Failed to list knowledge files")?;
        let indexed = self.index.sources().await;

        Ok(KnowledgeStatus {
            index_exists: stats.index_exists,
            document_count: stats.document_count,
            file_count: on_disk.len(),
            unindexed_files: on_disk.difference(&indexed).cloned().collect(),
            orphaned_sources: indexed.difference(&on_disk).cloned().collect(),
            indexed_sources: indexed.into_iter().collect(),
            model: stats.model,
            dims: stats.dims,
        })
    }
}
