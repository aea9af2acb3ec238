//! Test-case table parser with explicit fallback tiers.
//!
//! The synthesis stage produces pseudo-tabular, pipe-delimited text. The
//! parser accepts this grammar:
//!
//! ```text
//! table     := header? separator? row*
//! header    := '|' cell ('|' cell)* '|'?     (cells naming known columns)
//! separator := '|' (':'? '-'+ ':'?) ('|' ...)* '|'?
//! row       := '|' cell ('|' cell)* '|'?     (at least 3 non-empty cells)
//! ```
//!
//! A header maps cells to columns by name (English or Chinese synonyms);
//! without one, cells are taken positionally in [`COLUMNS`] order. Repeated
//! headers (one per test-point section) are skipped.
//!
//! | Tier | Trigger | Result |
//! |------|---------|--------|
//! | [`ParseTier::Table`] | always tried first | one row per data line |
//! | [`ParseTier::Paragraph`] | tier 1 parsed zero rows | one row per paragraph with `Label: value` lines |
//! | [`ParseTier::Placeholder`] | tier 2 parsed zero rows | a single row carrying the raw text |
//!
//! Parsing never fails, so export always has at least one row.

use serde::{Deserialize, Serialize};

use crate::points::split_paragraphs;

/// Display headers of the export spreadsheet, in column order.
pub const COLUMNS: [&str; 11] = [
    "Case ID",
    "Title",
    "Preconditions",
    "Steps",
    "Test Data",
    "Expected Result",
    "Priority",
    "Status",
    "Assignee",
    "Executed At",
    "Notes",
];

const PLACEHOLDER_TEXT_LIMIT: usize = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRow {
    pub case_id: String,
    pub title: String,
    pub preconditions: String,
    pub steps: String,
    pub test_data: String,
    pub expected_result: String,
    pub priority: String,
    pub status: String,
    pub assignee: String,
    pub executed_at: String,
    pub notes: String,
}

impl TestCaseRow {
    /// Cell values in [`COLUMNS`] order.
    pub fn cells(&self) -> [&str; 11] {
        [
            self.case_id.as_str(),
            self.title.as_str(),
            self.preconditions.as_str(),
            self.steps.as_str(),
            self.test_data.as_str(),
            self.expected_result.as_str(),
            self.priority.as_str(),
            self.status.as_str(),
            self.assignee.as_str(),
            self.executed_at.as_str(),
            self.notes.as_str(),
        ]
    }

    fn field_mut(&mut self, column: Column) -> &mut String {
        match column {
            Column::CaseId => &mut self.case_id,
            Column::Title => &mut self.title,
            Column::Preconditions => &mut self.preconditions,
            Column::Steps => &mut self.steps,
            Column::TestData => &mut self.test_data,
            Column::ExpectedResult => &mut self.expected_result,
            Column::Priority => &mut self.priority,
            Column::Status => &mut self.status,
            Column::Assignee => &mut self.assignee,
            Column::ExecutedAt => &mut self.executed_at,
            Column::Notes => &mut self.notes,
        }
    }
}

/// Values applied to cells the text leaves empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDefaults {
    pub priority: String,
    pub status: String,
}

impl Default for RowDefaults {
    fn default() -> Self {
        Self {
            priority: "Medium".to_string(),
            status: "Not Executed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    Table,
    Paragraph,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCases {
    pub rows: Vec<TestCaseRow>,
    pub tier: ParseTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    CaseId,
    Title,
    Preconditions,
    Steps,
    TestData,
    ExpectedResult,
    Priority,
    Status,
    Assignee,
    ExecutedAt,
    Notes,
}

const POSITIONAL: [Column; 11] = [
    Column::CaseId,
    Column::Title,
    Column::Preconditions,
    Column::Steps,
    Column::TestData,
    Column::ExpectedResult,
    Column::Priority,
    Column::Status,
    Column::Assignee,
    Column::ExecutedAt,
    Column::Notes,
];

fn column_for(label: &str) -> Option<Column> {
    let key: String = label
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '*' | '#'))
        .flat_map(char::to_lowercase)
        .collect();
    let column = match key.as_str() {
        "caseid" | "id" | "testcaseid" | "tcid" | "no" | "用例编号" | "用例id" | "编号"
        | "测试用例编号" => Column::CaseId,
        "title" | "name" | "casetitle" | "testcase" | "testcasetitle" | "casename" | "用例标题"
        | "标题" | "用例名称" | "测试标题" => Column::Title,
        "precondition" | "preconditions" | "prerequisite" | "prerequisites" | "前置条件"
        | "预置条件" => Column::Preconditions,
        "steps" | "step" | "teststeps" | "procedure" | "操作步骤" | "测试步骤" | "步骤" => {
            Column::Steps
        }
        "testdata" | "data" | "inputdata" | "input" | "测试数据" | "输入数据" => {
            Column::TestData
        }
        "expectedresult" | "expectedresults" | "expected" | "expectedoutput" | "预期结果"
        | "期望结果" => Column::ExpectedResult,
        "priority" | "优先级" => Column::Priority,
        "status" | "状态" | "执行状态" => Column::Status,
        "assignee" | "owner" | "tester" | "负责人" | "执行人" => Column::Assignee,
        "executedat" | "executiontime" | "executiondate" | "执行时间" | "执行日期" => {
            Column::ExecutedAt
        }
        "notes" | "note" | "remarks" | "comments" | "备注" => Column::Notes,
        _ => return None,
    };
    Some(column)
}

/// Parse free-text test cases into spreadsheet rows.
pub fn parse_test_cases(text: &str, defaults: &RowDefaults) -> ParsedCases {
    let (mut rows, tier) = {
        let table = parse_table(text);
        if !table.is_empty() {
            (table, ParseTier::Table)
        } else {
            let paragraphs = parse_paragraphs(text);
            if !paragraphs.is_empty() {
                (paragraphs, ParseTier::Paragraph)
            } else {
                (vec![placeholder_row(text)], ParseTier::Placeholder)
            }
        }
    };

    for (i, row) in rows.iter_mut().enumerate() {
        if row.case_id.is_empty() {
            row.case_id = format!("TC-{:03}", i + 1);
        }
        if row.priority.is_empty() {
            row.priority = defaults.priority.clone();
        }
        if row.status.is_empty() {
            row.status = defaults.status.clone();
        }
    }

    ParsedCases { rows, tier }
}

fn split_cells(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') && trimmed.matches('|').count() < 2 {
        return None;
    }
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    Some(
        inner
            .split('|')
            .map(|c| {
                c.trim()
                    .replace("<br>", "\n")
                    .replace("<br/>", "\n")
                    .replace("<br />", "\n")
            })
            .collect(),
    )
}

fn is_separator(cells: &[String]) -> bool {
    cells.iter().all(|c| {
        let c = c.trim();
        c.is_empty() || (c.contains('-') && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
    })
}

fn header_columns(cells: &[String]) -> Option<Vec<Option<Column>>> {
    let mapped: Vec<Option<Column>> = cells.iter().map(|c| column_for(c)).collect();
    let known = mapped.iter().filter(|c| c.is_some()).count();
    if known >= 2 {
        Some(mapped)
    } else {
        None
    }
}

fn parse_table(text: &str) -> Vec<TestCaseRow> {
    let mut rows = Vec::new();
    let mut layout: Option<Vec<Option<Column>>> = None;

    for line in text.lines() {
        let Some(cells) = split_cells(line) else {
            continue;
        };
        if is_separator(&cells) {
            continue;
        }
        if let Some(columns) = header_columns(&cells) {
            layout = Some(columns);
            continue;
        }
        if cells.iter().filter(|c| !c.is_empty()).count() < 3 {
            continue;
        }

        let mut row = TestCaseRow::default();
        for (idx, value) in cells.into_iter().enumerate() {
            let column = match &layout {
                Some(columns) => columns.get(idx).copied().flatten(),
                None => POSITIONAL.get(idx).copied(),
            };
            if let Some(column) = column {
                let field = row.field_mut(column);
                if field.is_empty() {
                    *field = value;
                }
            }
        }
        rows.push(row);
    }
    rows
}

fn split_label(line: &str) -> Option<(Column, String)> {
    let line = line.trim().trim_start_matches(['-', '*', ' ']);
    let pos = line.find([':', '：'])?;
    let (label, rest) = line.split_at(pos);
    let column = column_for(label)?;
    let value = rest
        .trim_start_matches([':', '：'])
        .trim()
        .trim_matches('*')
        .trim()
        .to_string();
    Some((column, value))
}

fn parse_paragraphs(text: &str) -> Vec<TestCaseRow> {
    let mut rows = Vec::new();
    for para in split_paragraphs(text) {
        let mut row = TestCaseRow::default();
        let mut recognised = 0;
        let mut last: Option<Column> = None;

        for line in para.lines() {
            if let Some((column, value)) = split_label(line) {
                *row.field_mut(column) = value;
                recognised += 1;
                last = Some(column);
            } else if line.trim_start().starts_with('#') {
                if row.title.is_empty() {
                    row.title = line.trim_start_matches('#').trim().to_string();
                }
            } else if let Some(column) = last {
                let field = row.field_mut(column);
                if !field.is_empty() {
                    field.push('\n');
                }
                field.push_str(line.trim());
            }
        }

        if recognised >= 2 {
            rows.push(row);
        }
    }
    rows
}

fn placeholder_row(text: &str) -> TestCaseRow {
    let trimmed = text.trim();
    let (steps, notes) = if trimmed.is_empty() {
        (String::new(), "No test cases were generated".to_string())
    } else {
        (
            trimmed.chars().take(PLACEHOLDER_TEXT_LIMIT).collect(),
            "Automatic parsing failed; the generated text is kept in Steps".to_string(),
        )
    };
    TestCaseRow {
        case_id: "TC-001".to_string(),
        title: "Unparsed test cases".to_string(),
        steps,
        expected_result: "Review the generated text manually".to_string(),
        notes,
        ..TestCaseRow::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_with_header() {
        let text = "\
### TP-001 Username boundary

| Case ID | Title | Preconditions | Steps | Test Data | Expected Result | Priority |
|---------|-------|---------------|-------|-----------|-----------------|----------|
| TC-001 | Empty username | On login page | 1. Leave username empty<br>2. Submit | username=\"\" | Error: username required | High |
| TC-002 | Long username | On login page | Enter 65 chars | a*65 | Rejected | |";
        let parsed = parse_test_cases(text, &RowDefaults::default());
        assert_eq!(parsed.tier, ParseTier::Table);
        assert_eq!(parsed.rows.len(), 2);
        let first = &parsed.rows[0];
        assert_eq!(first.case_id, "TC-001");
        assert_eq!(first.steps, "1. Leave username empty\n2. Submit");
        assert_eq!(first.expected_result, "Error: username required");
        assert_eq!(first.priority, "High");
        assert_eq!(first.status, "Not Executed");
        assert_eq!(parsed.rows[1].priority, "Medium");
    }

    #[test]
    fn test_chinese_header_and_column_order() {
        let text = "\
| 用例编号 | 用例标题 | 预期结果 | 操作步骤 |
| --- | --- | --- | --- |
| TC-010 | 正确登录 | 进入首页 | 输入正确账号密码 |";
        let parsed = parse_test_cases(text, &RowDefaults::default());
        assert_eq!(parsed.rows[0].case_id, "TC-010");
        assert_eq!(parsed.rows[0].expected_result, "进入首页");
        assert_eq!(parsed.rows[0].steps, "输入正确账号密码");
    }

    #[test]
    fn test_positional_without_header_and_missing_cells() {
        let text = "| TC-7 | Lockout | 5 failures | Enter wrong password 5 times | | Account locked";
        let parsed = parse_test_cases(text, &RowDefaults::default());
        let row = &parsed.rows[0];
        assert_eq!(row.case_id, "TC-7");
        assert_eq!(row.preconditions, "5 failures");
        assert_eq!(row.test_data, "");
        assert_eq!(row.expected_result, "Account locked");
        assert_eq!(row.priority, "Medium");
    }

    #[test]
    fn test_repeated_headers_skipped_and_ids_generated() {
        let text = "\
| Title | Steps | Expected Result |
|---|---|---|
| A | do a | a done |

| Title | Steps | Expected Result |
|---|---|---|
| B | do b | b done |";
        let parsed = parse_test_cases(text, &RowDefaults::default());
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].case_id, "TC-001");
        assert_eq!(parsed.rows[1].case_id, "TC-002");
        assert_eq!(parsed.rows[1].title, "B");
    }

    #[test]
    fn test_paragraph_fallback() {
        let text = "\
Case ID: TC-001
Title: Valid login
Steps: Enter valid credentials
  then press submit
Expected Result: Dashboard shown

ID: TC-002
Title: Wrong password
Expected result: Error message";
        let parsed = parse_test_cases(text, &RowDefaults::default());
        assert_eq!(parsed.tier, ParseTier::Paragraph);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].steps, "Enter valid credentials\nthen press submit");
        assert_eq!(parsed.rows[1].expected_result, "Error message");
        assert_eq!(parsed.rows[1].status, "Not Executed");
    }

    #[test]
    fn test_placeholder_fallback() {
        let parsed = parse_test_cases("The model returned prose only.", &RowDefaults::default());
        assert_eq!(parsed.tier, ParseTier::Placeholder);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].case_id, "TC-001");
        assert!(parsed.rows[0].steps.contains("prose only"));

        let empty = parse_test_cases("", &RowDefaults::default());
        assert_eq!(empty.rows.len(), 1);
        assert!(empty.rows[0].steps.is_empty());
    }

    #[test]
    fn test_custom_defaults() {
        let defaults = RowDefaults {
            priority: "P2".to_string(),
            status: "Pending".to_string(),
        };
        let parsed = parse_test_cases("| TC-1 | t | s | x |", &defaults);
        assert_eq!(parsed.rows[0].priority, "P2");
        assert_eq!(parsed.rows[0].status, "Pending");
    }
}
