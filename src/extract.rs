//! File-type extractors.
//!
//! An [`ExtractorRegistry`] maps a lowercase file extension to an
//! [`Extractor`]. Prose formats yield [`Extracted::Text`]; tabular formats
//! yield [`Extracted::Rows`] so the knowledge base can index them row by
//! row. Extraction never panics: corrupt or unsupported input is an
//! [`ExtractError`] and the caller decides whether to skip the file.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use calamine::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use casegen_core::models::SheetRows;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Rows kept per worksheet.
const MAX_ROWS_PER_SHEET: usize = 100_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: '{0}'")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
}

/// Result of extracting one file.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Text(String),
    Rows(Vec<SheetRows>),
}

impl Extracted {
    /// Flatten to prose. Sheets become `## Sheet: name` blocks of
    /// `|`-separated rows.
    pub fn into_text(self) -> String {
        match self {
            Extracted::Text(text) => text,
            Extracted::Rows(sheets) => {
                let mut out = String::new();
                for sheet in sheets {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("## Sheet: {}\n", sheet.name));
                    for row in &sheet.rows {
                        if row.iter().all(|c| c.trim().is_empty()) {
                            continue;
                        }
                        out.push_str(&row.join(" | "));
                        out.push('\n');
                    }
                }
                out
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Extracted::Text(text) => text.trim().is_empty(),
            Extracted::Rows(sheets) => sheets
                .iter()
                .all(|s| s.rows.iter().flatten().all(|c| c.trim().is_empty())),
        }
    }
}

pub trait Extractor: Send + Sync {
    /// File extensions handled, lowercase and without the dot.
    fn tags(&self) -> &'static [&'static str];
    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ============ Plain text ============

pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn tags(&self) -> &'static [&'static str] {
        &["txt", "md", "markdown"]
    }

    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        Ok(Extracted::Text(decode_text(&read_bytes(path)?)))
    }
}

// ============ PDF ============

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn tags(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let bytes = read_bytes(path)?;
        pdf_extract::extract_text_from_mem(&bytes)
            .map(Extracted::Text)
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

// ============ DOCX ============

pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn tags(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let bytes = read_bytes(path)?;
        docx_text(&bytes).map(Extracted::Text)
    }
}

fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph. Table cells are
/// separated by ` | ` so table rows stay readable.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut line = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => line.push('\t'),
                b"br" => line.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                line.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        out.push_str(trimmed);
                        out.push('\n');
                    }
                    line.clear();
                }
                b"tc" => {
                    if out.ends_with('\n') {
                        out.pop();
                    }
                    out.push_str(" | ");
                }
                b"tr" => {
                    let row = out.trim_end_matches(" | ").len();
                    out.truncate(row);
                    out.push('\n');
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Spreadsheets ============

pub struct SpreadsheetExtractor;

impl Extractor for SpreadsheetExtractor {
    fn tags(&self) -> &'static [&'static str] {
        &["xlsx", "xls", "xlsm", "ods"]
    }

    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let mut workbook = calamine::open_workbook_auto(path)
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ExtractError::Spreadsheet(format!("sheet '{}': {}", name, e)))?;
            let rows: Vec<Vec<String>> = range
                .rows()
                .take(MAX_ROWS_PER_SHEET)
                .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
                .collect();
            if !rows.is_empty() {
                sheets.push(SheetRows { name, rows });
            }
        }
        Ok(Extracted::Rows(sheets))
    }
}

// ============ CSV ============

pub struct CsvExtractor;

impl Extractor for CsvExtractor {
    fn tags(&self) -> &'static [&'static str] {
        &["csv"]
    }

    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let text = decode_text(&read_bytes(path)?);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Sheet1".to_string());
        Ok(Extracted::Rows(vec![SheetRows {
            name,
            rows: parse_csv(&text)?,
        }]))
    }
}

/// Comma-separated records with RFC 4180 quoting: quoted fields may
/// contain commas, newlines and doubled quotes.
pub fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }
    if in_quotes {
        return Err(ExtractError::Csv("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows
        .into_iter()
        .filter(|r| !(r.len() == 1 && r[0].trim().is_empty()))
        .collect())
}

// ============ Registry ============

/// Extension → extractor lookup, built once at startup.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_tag: BTreeMap<&'static str, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            by_tag: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for tag in extractor.tags() {
            self.by_tag.insert(*tag, extractor.clone());
        }
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.by_tag.keys().copied().collect()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_ok()
    }

    fn for_path(&self, path: &Path) -> Result<&Arc<dyn Extractor>, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match self.by_tag.get(ext.as_str()) {
            Some(extractor) => Ok(extractor),
            None if ext.is_empty() => Err(ExtractError::Unsupported(path.display().to_string())),
            None => Err(ExtractError::Unsupported(ext)),
        }
    }

    pub fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        self.for_path(path)?.extract(path)
    }

    /// Extract and flatten to prose, for documents fed to the pipeline.
    pub fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        Ok(self.extract(path)?.into_text())
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PlainTextExtractor));
        registry.register(Arc::new(PdfExtractor));
        registry.register(Arc::new(DocxExtractor));
        registry.register(Arc::new(SpreadsheetExtractor));
        registry.register(Arc::new(CsvExtractor));
        registry
    }
}
