//! Spreadsheet export of parsed test cases and of user feedback.
//!
//! Writes a single-sheet `.xlsx` workbook directly with `zip` and
//! `quick-xml` escaping: inline strings, a bold wrapped header row and
//! fixed column widths. Parsing never fails (see
//! [`parse_test_cases`]), so an export always produces a file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use quick_xml::escape::escape;
use serde::Serialize;
use zip::write::SimpleFileOptions;

use casegen_core::table::{parse_test_cases, ParseTier, RowDefaults, TestCaseRow, COLUMNS};

use crate::records::Feedback;

/// Column widths in characters, matching [`COLUMNS`].
const COLUMN_WIDTHS: [u32; 11] = [14, 30, 30, 45, 30, 40, 10, 14, 12, 18, 25];

pub const FEEDBACK_COLUMNS: [&str; 7] = [
    "ID",
    "Record ID",
    "Generator",
    "Adoption Rate (%)",
    "Time Saved (h)",
    "Problems",
    "Submitted At",
];
const FEEDBACK_WIDTHS: [u32; 7] = [8, 10, 16, 16, 14, 50, 22];

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub file_name: String,
    pub rows: usize,
    pub tier: ParseTier,
}

/// `<document stem>_test_cases_<YYYYmmdd_HHMMSS>.xlsx`
pub fn export_file_name(document_name: &str, now: DateTime<Local>) -> String {
    let stem = Path::new(document_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| if c.is_control() || "/\\:*?\"<>|".contains(c) { '_' } else { c })
        .collect();
    let stem = if stem.trim().is_empty() { "document".to_string() } else { stem };
    format!("{}_test_cases_{}.xlsx", stem, now.format("%Y%m%d_%H%M%S"))
}

/// Parse `text` and write it to `<outputs_dir>/<export_file_name>`.
pub async fn export_test_cases(
    outputs_dir: &Path,
    document_name: &str,
    text: &str,
    defaults: &RowDefaults,
) -> Result<ExportReport> {
    let parsed = parse_test_cases(text, defaults);
    let file_name = export_file_name(document_name, Local::now());
    let path = outputs_dir.join(&file_name);

    tokio::fs::create_dir_all(outputs_dir)
        .await
        .with_context(|| format!("Failed to create {}", outputs_dir.display()))?;

    let rows = parsed.rows.len();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_test_cases(&target, &parsed.rows))
        .await
        .context("Spreadsheet writer panicked")??;

    Ok(ExportReport {
        path,
        file_name,
        rows,
        tier: parsed.tier,
    })
}

/// `feedback_<start>_<end>.xlsx`
pub fn feedback_file_name(start: NaiveDate, end: NaiveDate) -> String {
    format!("feedback_{}_{}.xlsx", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}

/// One row per feedback entry under [`FEEDBACK_COLUMNS`].
pub fn render_feedback(feedback: &[Feedback]) -> Result<Vec<u8>> {
    let owned: Vec<[String; 7]> = feedback
        .iter()
        .map(|f| {
            [
                f.id.to_string(),
                f.record_id.map(|id| id.to_string()).unwrap_or_default(),
                f.generator_name.clone(),
                f.adoption_rate.to_string(),
                f.time_saved_hours.to_string(),
                f.problem_feedback.clone().unwrap_or_default(),
                f.created_at.clone(),
            ]
        })
        .collect();
    let rows: Vec<Vec<&str>> = owned
        .iter()
        .map(|cells| cells.iter().map(String::as_str).collect())
        .collect();
    render_xlsx("Feedback", &FEEDBACK_COLUMNS, &rows, &FEEDBACK_WIDTHS)
}

/// Write the feedback workbook to `path` off the async runtime.
pub async fn export_feedback(path: &Path, feedback: Vec<Feedback>) -> Result<()> {
    let bytes = tokio::task::spawn_blocking(move || render_feedback(&feedback))
        .await
        .context("Spreadsheet writer panicked")??;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_test_cases(path: &Path, rows: &[TestCaseRow]) -> Result<()> {
    let data: Vec<Vec<&str>> = rows.iter().map(|r| r.cells().to_vec()).collect();
    write_xlsx(path, "Test Cases", &COLUMNS, &data, &COLUMN_WIDTHS)
}

/// Render to bytes first, then write, so a failure never leaves a
/// half-written workbook behind.
pub fn write_xlsx(
    path: &Path,
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<&str>],
    widths: &[u32],
) -> Result<()> {
    let bytes = render_xlsx(sheet_name, headers, rows, widths)?;
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn render_xlsx(sheet_name: &str, headers: &[&str], rows: &[Vec<&str>], widths: &[u32]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let parts: [(&str, String); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml(sheet_name)),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/styles.xml", STYLES.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(headers, rows, widths)),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)
            .with_context(|| format!("Failed to add {} to workbook", name))?;
        zip.write_all(body.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

/// `0 → A`, `25 → Z`, `26 → AA`.
fn column_letter(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn xml_text(value: &str) -> String {
    let clean: String = value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    escape(clean.as_str()).into_owned()
}

fn push_row(out: &mut String, row_number: usize, cells: &[&str], style: u32) {
    out.push_str(&format!("<row r=\"{}\">", row_number));
    for (idx, value) in cells.iter().enumerate() {
        if value.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "<c r=\"{}{}\" s=\"{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
            column_letter(idx),
            row_number,
            style,
            xml_text(value)
        ));
    }
    out.push_str("</row>");
}

fn sheet_xml(headers: &[&str], rows: &[Vec<&str>], widths: &[u32]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
    );
    out.push_str("<sheetViews><sheetView workbookViewId=\"0\"><pane ySplit=\"1\" topLeftCell=\"A2\" activePane=\"bottomLeft\" state=\"frozen\"/></sheetView></sheetViews>");
    if !widths.is_empty() {
        out.push_str("<cols>");
        for (i, w) in widths.iter().enumerate() {
            out.push_str(&format!(
                "<col min=\"{n}\" max=\"{n}\" width=\"{w}\" customWidth=\"1\"/>",
                n = i + 1,
                w = w
            ));
        }
        out.push_str("</cols>");
    }
    out.push_str("<sheetData>");
    push_row(&mut out, 1, headers, 1);
    for (i, row) in rows.iter().enumerate() {
        push_row(&mut out, i + 2, row, 2);
    }
    out.push_str("</sheetData></worksheet>");
    out
}

fn workbook_xml(sheet_name: &str) -> String {
    // Sheet names are limited to 31 characters and may not contain []:*?/\
    let name: String = sheet_name
        .chars()
        .filter(|c| !"[]:*?/\\".contains(*c))
        .take(31)
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
        escape(name.as_str())
    )
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// Style 0: default. Style 1: bold, wrapped header. Style 2: wrapped body.
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1" applyAlignment="1"><alignment wrapText="1" vertical="top"/></xf><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="1" vertical="top"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;
