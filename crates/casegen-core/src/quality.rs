//! Local quality assessment of a document-analysis report.
//!
//! Scores a report without another model call: which expected sections
//! are present, how structured it is, and how many testability cues it
//! contains. The overall score is
//! `0.4 × completeness + 0.3 × min(100, 5 × headings) + 0.3 × testability`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Expected report sections and the phrases that reveal each one.
const SECTIONS: &[(&str, &[&str])] = &[
    (
        "Document overview",
        &["document overview", "document type", "document structure", "文档基本信息", "文档类型"],
    ),
    (
        "Functional points",
        &["functional point", "feature", "user role", "功能点", "功能模块", "用户角色"],
    ),
    (
        "Issues",
        &["ambiguit", "missing", "contradict", "issue", "问题识别", "模糊点", "遗漏点", "矛盾点"],
    ),
    (
        "Test focus",
        &["test focus", "test strateg", "test type", "测试关注点", "测试策略", "测试类型"],
    ),
    (
        "Self check",
        &["self-check", "self check", "supplement", "自我检查", "检查结果", "补充内容"],
    ),
    (
        "Summary",
        &["summary", "key issue", "conclusion", "综合报告", "报告摘要", "关键问题"],
    ),
];

const RISK_WORDS: &[&str] = &["risk", "issue", "defect", "error", "bug", "风险", "问题", "缺陷", "错误"];
const ACTION_WORDS: &[&str] = &["recommend", "suggest", "next step", "todo", "建议", "行动", "下一步", "待办"];

const INDICATORS: &[(&str, &[&str])] = &[
    (
        "clear_requirements",
        &[r"(?i)\b(must|shall|required)\b", r"明确的?(需求|要求)", r"具体(说明|描述)"],
    ),
    (
        "defined_conditions",
        &[r"(?i)\b(precondition|when|if)\b", r"(前置|触发)条件", r"当.*时", r"如果.*则"],
    ),
    (
        "expected_results",
        &[r"(?i)\b(expected (result|output)|should (show|display|return))", r"预期(结果|输出)", r"应该.*显示"],
    ),
    (
        "test_scenarios",
        &[r"(?i)\b(test scenario|test case|boundary)", r"测试场景", r"测试用例", r"边界条件"],
    ),
    (
        "data_requirements",
        &[r"(?i)\b(test data|input data|data format|data range)\b", r"测试数据", r"输入数据", r"数据(格式|范围)"],
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionCompleteness {
    pub found: usize,
    pub total: usize,
    pub percent: f64,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureMetrics {
    pub total_lines: usize,
    pub headings: usize,
    pub table_rows: usize,
    pub list_items: usize,
    pub risk_mentions: usize,
    pub action_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testability {
    pub score: f64,
    pub indicators: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Pass,
    NeedsImprovement,
}

impl QualityLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => QualityLevel::Excellent,
            s if s >= 80.0 => QualityLevel::Good,
            s if s >= 70.0 => QualityLevel::Fair,
            s if s >= 60.0 => QualityLevel::Pass,
            _ => QualityLevel::NeedsImprovement,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Pass => "pass",
            QualityLevel::NeedsImprovement => "needs improvement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub level: QualityLevel,
    pub completeness: SectionCompleteness,
    pub structure: StructureMetrics,
    pub testability: Testability,
}

impl QualityAssessment {
    /// Markdown rendering appended to the analysis report.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "## Quality assessment\n\n- Overall score: {:.1} ({})\n- Section completeness: {:.1}% ({}/{})\n- Headings: {}, table rows: {}, list items: {}\n- Testability score: {:.0}\n",
            self.overall_score,
            self.level.label(),
            self.completeness.percent,
            self.completeness.found,
            self.completeness.total,
            self.structure.headings,
            self.structure.table_rows,
            self.structure.list_items,
            self.testability.score,
        );
        if !self.completeness.missing.is_empty() {
            out.push_str(&format!(
                "- Missing sections: {}\n",
                self.completeness.missing.join(", ")
            ));
        }
        for rec in &self.testability.recommendations {
            out.push_str(&format!("- Recommendation: {}\n", rec));
        }
        out
    }
}

fn indicator_patterns() -> &'static Vec<(&'static str, Vec<Regex>)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INDICATORS
            .iter()
            .map(|(name, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect();
                (*name, compiled)
            })
            .collect()
    })
}

pub fn section_completeness(report: &str) -> SectionCompleteness {
    let lower = report.to_lowercase();
    let missing: Vec<String> = SECTIONS
        .iter()
        .filter(|(_, cues)| !cues.iter().any(|cue| lower.contains(cue)))
        .map(|(name, _)| name.to_string())
        .collect();
    let total = SECTIONS.len();
    let found = total - missing.len();
    SectionCompleteness {
        found,
        total,
        percent: round2(found as f64 * 100.0 / total as f64),
        missing,
    }
}

pub fn structure_metrics(report: &str) -> StructureMetrics {
    let lower = report.to_lowercase();
    let lines: Vec<&str> = report.lines().collect();
    let headings = lines
        .iter()
        .filter(|l| {
            let hashes = l.chars().take_while(|c| *c == '#').count();
            (1..=3).contains(&hashes) && l[hashes..].starts_with(' ') && !l[hashes..].trim().is_empty()
        })
        .count();
    let table_rows = lines
        .iter()
        .filter(|l| {
            let t = l.trim();
            t.starts_with('|') && t.ends_with('|') && t.len() > 1
        })
        .count();
    let list_items = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            (t.starts_with("- ") || t.starts_with("* ")) && t.len() > 2
        })
        .count();
    let count = |words: &[&str]| -> usize { words.iter().map(|w| lower.matches(*w).count()).sum() };

    StructureMetrics {
        total_lines: lines.len(),
        headings,
        table_rows,
        list_items,
        risk_mentions: count(RISK_WORDS),
        action_items: count(ACTION_WORDS),
    }
}

pub fn testability(report: &str) -> Testability {
    let mut indicators = BTreeMap::new();
    for (name, patterns) in indicator_patterns() {
        let hits: usize = patterns.iter().map(|re| re.find_iter(report).count()).sum();
        indicators.insert(name.to_string(), hits);
    }

    let total: usize = indicators.values().sum();
    let score = (total as f64 * 10.0).min(100.0);

    let thresholds = [
        ("clear_requirements", 3, "State requirements more explicitly"),
        ("defined_conditions", 2, "Define preconditions and triggers"),
        ("expected_results", 3, "Give every functional point an expected result"),
        ("test_scenarios", 5, "Add more test scenarios and boundary conditions"),
        ("data_requirements", 2, "Specify the required test data"),
    ];
    let recommendations = thresholds
        .iter()
        .filter(|(name, min, _)| indicators.get(*name).copied().unwrap_or(0) < *min)
        .map(|(_, _, rec)| rec.to_string())
        .collect();

    Testability {
        score,
        indicators,
        recommendations,
    }
}

/// Full assessment of an analysis report.
pub fn assess(report: &str) -> QualityAssessment {
    let completeness = section_completeness(report);
    let structure = structure_metrics(report);
    let testability = testability(report);

    let overall = completeness.percent * 0.4
        + (structure.headings as f64 * 5.0).min(100.0) * 0.3
        + testability.score * 0.3;
    let overall_score = round2(overall);

    QualityAssessment {
        overall_score,
        level: QualityLevel::from_score(overall_score),
        completeness,
        structure,
        testability,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
