//! Generation pipeline session and its stage state machine.
//!
//! ```text
//! NotStarted ─▶ DocumentAnalysis ─▶ TestPointDesign ─▶ TestCaseSynthesis ─▶ Export
//!      ▲                 ◀──────────── go_back (later outputs kept) ─────────┘
//!      └──────────────────────────── reset (everything cleared) ─────────────┘
//! ```
//!
//! A stage may only run when the stage before it has non-empty output,
//! either generated or edited by the user. Outputs are committed only
//! after a successful run, so a failed attempt leaves the session exactly
//! as it was. `regenerate` clears one stage's output and re-enters it
//! without touching the others.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::points::CompletenessReport;
use crate::quality::QualityAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    DocumentAnalysis,
    TestPointDesign,
    TestCaseSynthesis,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::NotStarted,
        Stage::DocumentAnalysis,
        Stage::TestPointDesign,
        Stage::TestCaseSynthesis,
        Stage::Export,
    ];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::NotStarted => Some(Stage::DocumentAnalysis),
            Stage::DocumentAnalysis => Some(Stage::TestPointDesign),
            Stage::TestPointDesign => Some(Stage::TestCaseSynthesis),
            Stage::TestCaseSynthesis => Some(Stage::Export),
            Stage::Export => None,
        }
    }

    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::NotStarted => None,
            Stage::DocumentAnalysis => Some(Stage::NotStarted),
            Stage::TestPointDesign => Some(Stage::DocumentAnalysis),
            Stage::TestCaseSynthesis => Some(Stage::TestPointDesign),
            Stage::Export => Some(Stage::TestCaseSynthesis),
        }
    }

    /// Stages whose output is LLM-generated text.
    pub fn is_generative(self) -> bool {
        matches!(
            self,
            Stage::DocumentAnalysis | Stage::TestPointDesign | Stage::TestCaseSynthesis
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NotStarted => "not_started",
            Stage::DocumentAnalysis => "document_analysis",
            Stage::TestPointDesign => "test_point_design",
            Stage::TestCaseSynthesis => "test_case_synthesis",
            Stage::Export => "export",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::NotStarted => "not started",
            Stage::DocumentAnalysis => "document analysis",
            Stage::TestPointDesign => "test point design",
            Stage::TestCaseSynthesis => "test case synthesis",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        match key.as_str() {
            "not_started" => Ok(Stage::NotStarted),
            "document_analysis" | "analysis" | "summary" => Ok(Stage::DocumentAnalysis),
            "test_point_design" | "test_points" | "points" => Ok(Stage::TestPointDesign),
            "test_case_synthesis" | "test_cases" | "cases" => Ok(Stage::TestCaseSynthesis),
            "export" => Ok(Stage::Export),
            _ => Err(StageError::UnknownStage(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("unknown stage: '{0}'")]
    UnknownStage(String),
    #[error("no document loaded; upload a requirements document first")]
    NoDocument,
    #[error("cannot run {stage}: {requires} output is empty")]
    MissingInput { stage: Stage, requires: Stage },
    #[error("cannot confirm {0}: output is empty")]
    EmptyOutput(Stage),
    #[error("{0} has no editable output")]
    NotGenerative(Stage),
    #[error("cannot go back from {from} to {to}")]
    NotEarlier { from: Stage, to: Stage },
}

/// Outputs of one successful stage run, committed atomically.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub output: String,
    pub review: Option<String>,
    pub quality: Option<QualityAssessment>,
    pub completeness: Option<CompletenessReport>,
}

/// In-progress state of one generation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSession {
    pub id: String,
    pub document_name: Option<String>,
    pub file_path: Option<String>,
    #[serde(default)]
    pub document_text: String,
    pub stage: Stage,
    #[serde(default)]
    pub summary: String,
    pub summary_review: Option<String>,
    pub quality: Option<QualityAssessment>,
    #[serde(default)]
    pub test_points: String,
    pub test_points_review: Option<String>,
    #[serde(default)]
    pub test_cases: String,
    pub validation_report: Option<String>,
    pub completeness: Option<CompletenessReport>,
    pub export_path: Option<String>,
    pub record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl PipelineSession {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            document_name: None,
            file_path: None,
            document_text: String::new(),
            stage: Stage::NotStarted,
            summary: String::new(),
            summary_review: None,
            quality: None,
            test_points: String::new(),
            test_points_review: None,
            test_cases: String::new(),
            validation_report: None,
            completeness: None,
            export_path: None,
            record_id: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Attach a new document. Any outputs from a previous document are discarded.
    pub fn load_document(&mut self, name: &str, path: Option<String>, text: String) {
        let (id, created) = (self.id.clone(), self.created_at);
        *self = Self::new(id, created);
        self.document_name = Some(name.to_string());
        self.file_path = path;
        self.document_text = text;
        self.touch(Utc::now());
    }

    pub fn has_document(&self) -> bool {
        !self.document_text.trim().is_empty()
    }

    /// The primary text output of `stage`; empty when not yet produced.
    pub fn output(&self, stage: Stage) -> &str {
        match stage {
            Stage::NotStarted => self.document_text.as_str(),
            Stage::DocumentAnalysis => self.summary.as_str(),
            Stage::TestPointDesign => self.test_points.as_str(),
            Stage::TestCaseSynthesis => self.test_cases.as_str(),
            Stage::Export => self.export_path.as_deref().unwrap_or(""),
        }
    }

    pub fn review(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::DocumentAnalysis => self.summary_review.as_deref(),
            Stage::TestPointDesign => self.test_points_review.as_deref(),
            Stage::TestCaseSynthesis => self.validation_report.as_deref(),
            _ => None,
        }
    }

    /// Input text for `stage`, or the gating error when its predecessor
    /// has produced nothing.
    pub fn input_for(&self, stage: Stage) -> Result<&str, StageError> {
        let requires = match stage {
            Stage::NotStarted => return Err(StageError::NotGenerative(stage)),
            Stage::DocumentAnalysis => {
                return if self.has_document() {
                    Ok(self.document_text.as_str())
                } else {
                    Err(StageError::NoDocument)
                };
            }
            Stage::TestPointDesign => Stage::DocumentAnalysis,
            Stage::TestCaseSynthesis => Stage::TestPointDesign,
            Stage::Export => Stage::TestCaseSynthesis,
        };
        let input = self.output(requires);
        if input.trim().is_empty() {
            Err(StageError::MissingInput { stage, requires })
        } else {
            Ok(input)
        }
    }

    /// Make `stage` current after checking its input is available.
    pub fn enter(&mut self, stage: Stage) -> Result<(), StageError> {
        self.input_for(stage)?;
        self.stage = stage;
        self.touch(Utc::now());
        Ok(())
    }

    /// Store the outputs of a successful run of `stage`.
    pub fn commit(&mut self, stage: Stage, outcome: StageOutcome) -> Result<(), StageError> {
        self.input_for(stage)?;
        match stage {
            Stage::DocumentAnalysis => {
                self.summary = outcome.output;
                self.summary_review = outcome.review;
                self.quality = outcome.quality;
            }
            Stage::TestPointDesign => {
                self.test_points = outcome.output;
                self.test_points_review = outcome.review;
            }
            Stage::TestCaseSynthesis => {
                self.test_cases = outcome.output;
                self.validation_report = outcome.review;
                self.completeness = outcome.completeness;
            }
            Stage::Export => {
                self.export_path = Some(outcome.output);
            }
            Stage::NotStarted => return Err(StageError::NotGenerative(stage)),
        }
        self.stage = stage;
        self.touch(Utc::now());
        Ok(())
    }

    fn text_slot(&mut self, stage: Stage) -> Result<&mut String, StageError> {
        match stage {
            Stage::DocumentAnalysis => Ok(&mut self.summary),
            Stage::TestPointDesign => Ok(&mut self.test_points),
            Stage::TestCaseSynthesis => Ok(&mut self.test_cases),
            Stage::NotStarted | Stage::Export => Err(StageError::NotGenerative(stage)),
        }
    }

    /// Replace a stage's text with a user edit.
    pub fn set_output(&mut self, stage: Stage, text: String) -> Result<(), StageError> {
        if !stage.is_generative() {
            return Err(StageError::NotGenerative(stage));
        }
        self.input_for(stage)?;
        *self.text_slot(stage)? = text;
        self.touch(Utc::now());
        Ok(())
    }

    /// Supply `stage`'s output from outside the pipeline, without requiring
    /// the stages before it. Later stages can then run on that text alone.
    pub fn seed_output(&mut self, stage: Stage, text: String) -> Result<(), StageError> {
        if text.trim().is_empty() {
            return Err(StageError::EmptyOutput(stage));
        }
        *self.text_slot(stage)? = text;
        self.touch(Utc::now());
        Ok(())
    }

    /// Accept `stage`'s output (optionally edited) and advance past it.
    ///
    /// Returns the new current stage.
    pub fn confirm(&mut self, stage: Stage, edited: Option<String>) -> Result<Stage, StageError> {
        if let Some(text) = edited {
            self.set_output(stage, text)?;
        }
        if !stage.is_generative() {
            return Err(StageError::NotGenerative(stage));
        }
        if self.output(stage).trim().is_empty() {
            return Err(StageError::EmptyOutput(stage));
        }
        let next = stage.next().unwrap_or(stage);
        self.stage = next;
        self.touch(Utc::now());
        Ok(next)
    }

    /// Clear `stage`'s outputs and make it current again.
    pub fn regenerate(&mut self, stage: Stage) -> Result<(), StageError> {
        self.input_for(stage)?;
        match stage {
            Stage::DocumentAnalysis => {
                self.summary.clear();
                self.summary_review = None;
                self.quality = None;
            }
            Stage::TestPointDesign => {
                self.test_points.clear();
                self.test_points_review = None;
            }
            Stage::TestCaseSynthesis => {
                self.test_cases.clear();
                self.validation_report = None;
                self.completeness = None;
            }
            Stage::Export => {
                self.export_path = None;
                self.record_id = None;
            }
            Stage::NotStarted => return Err(StageError::NotGenerative(stage)),
        }
        self.stage = stage;
        self.touch(Utc::now());
        Ok(())
    }

    /// Return to an earlier stage, keeping every output.
    pub fn go_back(&mut self, to: Stage) -> Result<(), StageError> {
        if to >= self.stage {
            return Err(StageError::NotEarlier {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        self.touch(Utc::now());
        Ok(())
    }

    /// Discard the document and all outputs.
    pub fn reset(&mut self) {
        let (id, created) = (self.id.clone(), self.created_at);
        *self = Self::new(id, created);
        self.touch(Utc::now());
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }
}
