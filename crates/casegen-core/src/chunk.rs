//! Overlapping text chunker and row-oriented table chunker.
//!
//! Free text is split into segments of at most `chunk_size` characters
//! with `overlap` characters shared between neighbours. Tabular sources
//! bypass the text chunker: every row (or small group of rows) becomes a
//! chunk of `column: value` pairs so that a single row stays retrievable.
//!
//! # Break selection
//!
//! For every window `[start, start + chunk_size)` the chunker looks
//! backwards from the window end for the latest natural boundary, in
//! order of preference:
//!
//! 1. a paragraph break (`\n\n`)
//! 2. a line break
//! 3. a sentence terminator (`.`, `!`, `?`, `;` and their CJK forms)
//! 4. any whitespace
//!
//! A boundary is only accepted in the second half of the window, so
//! segments never degenerate into slivers. Without one, the window is cut
//! at the character limit.
//!
//! # Example
//!
//! ```rust
//! use casegen_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Login requires a password.", "req.md", 500, 50);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.total_chunks, 1);
//! ```

use crate::models::{ChunkMetadata, DocumentChunk, SheetRows};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

const SENTENCE_ENDS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；'];

/// Split `text` into overlapping chunks attributed to `source`.
///
/// Empty or whitespace-only input yields no chunks. Indices are
/// contiguous from 0 and every chunk carries the final `total_chunks`.
pub fn chunk_text(
    text: &str,
    source: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<DocumentChunk> {
    let chars: Vec<char> = text.chars().collect();
    let size = chunk_size.max(1);
    let overlap = overlap.min(size - 1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_break(&chars, start, hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    finalize(pieces, source, |_| (None, None))
}

/// Chunk spreadsheet rows, `rows_per_chunk` data rows per chunk.
///
/// The first row of each sheet is its header. A row is rendered as
/// `column: value; column: value` with empty cells omitted, and rows with
/// no values at all are skipped. Metadata records the sheet and the
/// 1-based spreadsheet row of the first row in the group.
pub fn chunk_rows(sheets: &[SheetRows], source: &str, rows_per_chunk: usize) -> Vec<DocumentChunk> {
    let per_chunk = rows_per_chunk.max(1);
    let mut pieces = Vec::new();
    let mut positions = Vec::new();

    for sheet in sheets {
        let Some((header, data)) = sheet.rows.split_first() else {
            continue;
        };

        let rendered: Vec<(usize, String)> = data
            .iter()
            .enumerate()
            .filter_map(|(i, row)| render_row(header, row).map(|line| (i + 2, line)))
            .collect();

        for group in rendered.chunks(per_chunk) {
            let content = group
                .iter()
                .map(|(_, line)| line.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            pieces.push(content);
            positions.push((Some(sheet.name.clone()), Some(group[0].0)));
        }
    }

    finalize(pieces, source, |i| positions[i].clone())
}

fn render_row(header: &[String], row: &[String]) -> Option<String> {
    let pairs: Vec<String> = row
        .iter()
        .enumerate()
        .filter_map(|(idx, cell)| {
            let value = cell.trim();
            if value.is_empty() {
                return None;
            }
            let column = header
                .get(idx)
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("column_{}", idx + 1));
            Some(format!("{}: {}", column, value))
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let min = start + (hard_end - start) / 2;

    if let Some(i) = last_match(min, hard_end, |i| {
        i + 1 < hard_end && chars[i] == '\n' && chars[i + 1] == '\n'
    }) {
        return i + 2;
    }
    if let Some(i) = last_match(min, hard_end, |i| chars[i] == '\n') {
        return i + 1;
    }
    if let Some(i) = last_match(min, hard_end, |i| SENTENCE_ENDS.contains(&chars[i])) {
        return i + 1;
    }
    if let Some(i) = last_match(min, hard_end, |i| chars[i].is_whitespace()) {
        return i + 1;
    }
    hard_end
}

fn last_match(min: usize, end: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (min..end).rev().find(|&i| pred(i))
}

fn finalize<F>(pieces: Vec<String>, source: &str, position: F) -> Vec<DocumentChunk>
where
    F: Fn(usize) -> (Option<String>, Option<usize>),
{
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let (sheet, row) = position(i);
            DocumentChunk {
                content,
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    chunk_index: i,
                    total_chunks: total,
                    sheet,
                    row,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        (0..40)
            .map(|i| format!("Requirement {} describes how the login form validates input.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", "a.txt", 500, 50).is_empty());
        assert!(chunk_text("   \n\n  ", "a.txt", 500, 50).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("User login requires username and password", "req.txt", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "User login requires username and password");
        assert_eq!(chunks[0].metadata.source, "req.txt");
        assert_eq!(chunks[0].metadata.chunk_index, 0);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
    }

    #[test]
    fn test_chunks_bounded_and_contiguous() {
        let text = sample_text();
        let chunks = chunk_text(&text, "req.txt", 120, 20);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_index, i);
            assert_eq!(c.metadata.total_chunks, chunks.len());
            assert!(!c.content.trim().is_empty());
            assert!(c.content.chars().count() <= 120);
        }
    }

    #[test]
    fn test_chunks_cover_every_word() {
        let text = sample_text();
        let chunks = chunk_text(&text, "req.txt", 100, 15);
        let joined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for word in text.split_whitespace() {
            assert!(joined.contains(word), "missing word {}", word);
        }
    }

    #[test]
    fn test_overlap_shares_content() {
        let text = "a".repeat(300);
        let chunks = chunk_text(&text, "x", 100, 10);
        assert_eq!(chunks[0].content.len(), 100);
        // 300 chars, step 90
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let first = "First paragraph about login. ".repeat(3);
        let second = "Second paragraph about logout. ".repeat(3);
        let text = format!("{}\n\n{}", first.trim(), second.trim());
        let chunks = chunk_text(&text, "x", 120, 0);
        assert!(chunks[0].content.ends_with("login."));
        assert!(chunks[1].content.starts_with("Second"));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "用户登录需要用户名和密码。密码长度不少于八位。".repeat(20);
        let chunks = chunk_text(&text, "需求.txt", 50, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.chars().count() <= 50);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        assert_eq!(chunk_text(&text, "x", 80, 10), chunk_text(&text, "x", 80, 10));
    }

    #[test]
    fn test_overlap_larger_than_size_terminates() {
        let chunks = chunk_text("abcdefghij", "x", 3, 10);
        assert!(!chunks.is_empty());
    }

    fn sheet(rows: &[&[&str]]) -> SheetRows {
        SheetRows {
            name: "Rules".to_string(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_rows_one_chunk_per_row() {
        let s = sheet(&[
            &["feature", "rule"],
            &["login", "password >= 8 chars"],
            &["logout", "session cleared"],
        ]);
        let chunks = chunk_rows(&[s], "rules.xlsx", 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "feature: login; rule: password >= 8 chars");
        assert_eq!(chunks[0].metadata.sheet.as_deref(), Some("Rules"));
        assert_eq!(chunks[0].metadata.row, Some(2));
        assert_eq!(chunks[1].metadata.row, Some(3));
        assert_eq!(chunks[1].metadata.chunk_index, 1);
        assert_eq!(chunks[1].metadata.total_chunks, 2);
    }

    #[test]
    fn test_rows_skip_empty_and_name_missing_headers() {
        let s = sheet(&[
            &["feature"],
            &["", ""],
            &["login", "extra"],
        ]);
        let chunks = chunk_rows(&[s], "r.csv", 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "feature: login; column_2: extra");
        assert_eq!(chunks[0].metadata.row, Some(3));
    }

    #[test]
    fn test_rows_grouped() {
        let s = sheet(&[&["k"], &["a"], &["b"], &["c"]]);
        let chunks = chunk_rows(&[s], "r.csv", 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "k: a\nk: b");
        assert_eq!(chunks[1].metadata.row, Some(4));
    }

    #[test]
    fn test_rows_header_only_sheet() {
        let s = sheet(&[&["feature", "rule"]]);
        assert!(chunk_rows(&[s], "r.csv", 1).is_empty());
    }
}
