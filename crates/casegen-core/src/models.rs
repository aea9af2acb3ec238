//! Core data models shared by the chunker, the vector index, and callers.

use serde::{Deserialize, Serialize};

/// A bounded segment of source content prepared for embedding.
///
/// Chunks are immutable once produced. `content` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Provenance of a [`DocumentChunk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating file name.
    pub source: String,
    /// 0-based position within the source.
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Worksheet name for chunks derived from tabular data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    /// 1-based spreadsheet row number (the header is row 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: ChunkMetadata {
                source: source.into(),
                chunk_index: 0,
                total_chunks: 1,
                sheet: None,
                row: None,
            },
        }
    }
}

/// Rows of one worksheet, header first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRows {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}
