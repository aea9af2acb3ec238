//! Test-point parsing and per-point completeness bookkeeping.
//!
//! Test-case synthesis runs one generation per test point. The points are
//! parsed out of the free-text test-point artifact, each point's outcome is
//! recorded as a [`PointResult`], and [`completeness`] compares the parsed
//! identifiers with the ones that produced output.
//!
//! # Parsing tiers
//!
//! Each tier runs only when the previous one found nothing:
//!
//! 1. Pipe-table rows whose first cell is a point id (`TP-001`).
//! 2. Lines that start with a point id, optionally as a heading or bullet;
//!    the following lines up to the next id form the body.
//! 3. Numbered list items (`1.`, `2)`, `3、`), numbered in order.
//! 4. Blank-line separated paragraphs.
//!
//! Identifiers are normalised to `TP-NNN`.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPoint {
    pub id: String,
    pub title: String,
    /// Full text of the point, including the title line.
    pub body: String,
}

/// Outcome of generating test cases for one point.
#[derive(Debug, Clone)]
pub struct PointResult {
    pub point: TestPoint,
    pub output: Result<String, String>,
}

impl PointResult {
    pub fn succeeded(&self) -> bool {
        matches!(&self.output, Ok(text) if !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFailure {
    pub id: String,
    pub error: String,
}

/// Coverage of parsed test points by successful generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub total: usize,
    pub covered: usize,
    pub coverage_percent: f64,
    /// Ids with no successful output, in parse order.
    pub uncovered: Vec<String>,
    pub failures: Vec<PointFailure>,
}

impl CompletenessReport {
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Coverage: {}/{} test points ({:.1}%)",
            self.covered, self.total, self.coverage_percent
        );
        if !self.uncovered.is_empty() {
            line.push_str(&format!(". Uncovered: {}", self.uncovered.join(", ")));
        }
        line
    }
}

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[#*\-\s>]*\**\s*(?:TP|测试点)\s*[-_ ]?\s*(\d+)\**\s*[:：.、)\-]?\s*(.*)$")
            .expect("valid regex")
    })
}

fn numbered_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*[.)、]\s+(.+)$").expect("valid regex"))
}

/// Normalise a numeric id to `TP-NNN`.
pub fn point_id(n: u32) -> String {
    format!("TP-{:03}", n)
}

/// Parse the test-point artifact into discrete points.
pub fn parse_test_points(text: &str) -> Vec<TestPoint> {
    for tier in [parse_table, parse_id_sections, parse_numbered, parse_paragraphs] {
        let points = dedupe(tier(text));
        if !points.is_empty() {
            return points;
        }
    }
    Vec::new()
}

fn dedupe(points: Vec<TestPoint>) -> Vec<TestPoint> {
    let mut seen = HashSet::new();
    points
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

fn parse_table(text: &str) -> Vec<TestPoint> {
    text.lines()
        .filter(|l| l.trim_start().starts_with('|'))
        .filter_map(|line| {
            let cells: Vec<&str> = line
                .trim()
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect();
            let first = cells.first()?.trim_matches('*').trim();
            let caps = id_pattern().captures(first)?;
            if !caps[2].trim().is_empty() {
                return None;
            }
            let n: u32 = caps[1].parse().ok()?;
            let title = cells.get(1).map(|c| c.to_string()).unwrap_or_default();
            Some(TestPoint {
                id: point_id(n),
                title,
                body: cells.join(" | "),
            })
        })
        .collect()
}

fn parse_id_sections(text: &str) -> Vec<TestPoint> {
    let mut points: Vec<TestPoint> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = id_pattern().captures(line.trim()) {
            if let Ok(n) = caps[1].parse::<u32>() {
                let title = caps[2].trim().trim_matches('*').trim().to_string();
                points.push(TestPoint {
                    id: point_id(n),
                    title,
                    body: line.trim().to_string(),
                });
                continue;
            }
        }
        if let Some(current) = points.last_mut() {
            if !line.trim().is_empty() {
                current.body.push('\n');
                current.body.push_str(line.trim_end());
            }
        }
    }
    points
}

fn parse_numbered(text: &str) -> Vec<TestPoint> {
    let mut points: Vec<TestPoint> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = numbered_pattern().captures(line) {
            let title = caps[2].trim().to_string();
            points.push(TestPoint {
                id: point_id(points.len() as u32 + 1),
                title,
                body: line.trim().to_string(),
            });
        } else if let Some(current) = points.last_mut() {
            if !line.trim().is_empty() {
                current.body.push('\n');
                current.body.push_str(line.trim_end());
            }
        }
    }
    points
}

fn parse_paragraphs(text: &str) -> Vec<TestPoint> {
    split_paragraphs(text)
        .into_iter()
        .enumerate()
        .map(|(i, para)| {
            let title = para
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches('#')
                .trim()
                .to_string();
            TestPoint {
                id: point_id(i as u32 + 1),
                title,
                body: para,
            }
        })
        .collect()
}

pub(crate) fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// Compare parsed points against their generation results.
pub fn completeness(points: &[TestPoint], results: &[PointResult]) -> CompletenessReport {
    let succeeded: HashSet<&str> = results
        .iter()
        .filter(|r| r.succeeded())
        .map(|r| r.point.id.as_str())
        .collect();

    let uncovered: Vec<String> = points
        .iter()
        .filter(|p| !succeeded.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    let failures = results
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| PointFailure {
            id: r.point.id.clone(),
            error: match &r.output {
                Err(e) => e.clone(),
                Ok(_) => "empty output".to_string(),
            },
        })
        .collect();

    let total = points.len();
    let covered = total - uncovered.len();
    let coverage_percent = if total == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / total as f64
    };

    CompletenessReport {
        total,
        covered,
        coverage_percent,
        uncovered,
        failures,
    }
}

/// Concatenate the successful outputs, in point order, under a heading per point.
pub fn assemble_artifact(results: &[PointResult]) -> String {
    results
        .iter()
        .filter(|r| r.succeeded())
        .filter_map(|r| {
            let text = r.output.as_ref().ok()?;
            let heading = if r.point.title.is_empty() {
                format!("### {}", r.point.id)
            } else {
                format!("### {} {}", r.point.id, r.point.title)
            };
            Some(format!("{}\n\n{}\n", heading, text.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
