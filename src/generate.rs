//! Pipeline runner: drives a [`PipelineSession`] through its stages with
//! the LLM, optional knowledge grounding and the spreadsheet exporter.
//!
//! A stage attempt either commits all of its outputs or none of them. An
//! LLM failure in the main call aborts the attempt and leaves the session
//! exactly as it was; grounding and validation failures only add
//! warnings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use casegen_core::pipeline::{PipelineSession, Stage, StageError, StageOutcome};
use casegen_core::points::{
    assemble_artifact, completeness, parse_test_points, CompletenessReport, PointResult,
};
use casegen_core::quality::{assess, QualityAssessment};
use casegen_core::table::{ParseTier, RowDefaults};

use crate::config::Config;
use crate::export::{export_test_cases, ExportReport};
use crate::knowledge::KnowledgeBase;
use crate::llm::{ChatMessage, LlmClient};
use crate::prompts;
use crate::records::{NewRecord, Record, RecordStore};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run the cross-check call after generating.
    pub validate: bool,
    /// Extra instructions appended to the stage prompt.
    pub prompt: Option<String>,
    pub use_knowledge: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            validate: true,
            prompt: None,
            use_knowledge: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub output: String,
    pub review: Option<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completeness: Option<CompletenessReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportReport>,
    pub next_stage: Option<Stage>,
}

impl StageReport {
    fn new(stage: Stage, output: String) -> Self {
        Self {
            stage,
            output,
            review: None,
            warnings: Vec::new(),
            completeness: None,
            quality: None,
            export: None,
            next_stage: stage.next(),
        }
    }
}

pub struct Generator {
    llm: Arc<dyn LlmClient>,
    kb: Option<Arc<KnowledgeBase>>,
    grounding_k: usize,
    validate: bool,
    outputs_dir: PathBuf,
    row_defaults: RowDefaults,
}

fn grounding_topic(stage: Stage) -> &'static str {
    match stage {
        Stage::DocumentAnalysis => "requirements analysis business rules",
        Stage::TestPointDesign => "test design equivalence class boundary value",
        _ => "test case writing expected result test data",
    }
}

impl Generator {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>, kb: Option<Arc<KnowledgeBase>>) -> Self {
        Self {
            llm,
            kb,
            grounding_k: config.retrieval.grounding_k,
            validate: config.llm.validate,
            outputs_dir: config.outputs_dir(),
            row_defaults: config.export.row_defaults(),
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// Run one stage. On error the session is unchanged.
    pub async fn run_stage(
        &self,
        session: &mut PipelineSession,
        stage: Stage,
        opts: &RunOptions,
    ) -> Result<StageReport> {
        let input = session.input_for(stage)?.to_string();
        info!(session = %session.id, stage = %stage, "running stage");

        if stage == Stage::Export {
            return self.export(session).await;
        }

        let mut warnings = Vec::new();
        let knowledge = if opts.use_knowledge {
            self.grounding(stage, &input, &mut warnings).await
        } else {
            None
        };
        let extra = opts.prompt.as_deref();
        let validate = opts.validate && self.validate;

        let (outcome, mut report) = match stage {
            Stage::DocumentAnalysis => {
                let output = self
                    .llm
                    .complete(&prompts::analysis(&input, knowledge.as_deref(), extra))
                    .await
                    .context("Document analysis failed")?;
                let review = if validate {
                    Some(self.review(prompts::analysis_review(&input, &output), &mut warnings).await)
                } else {
                    None
                };
                let quality = assess(&output);
                info!(score = quality.overall_score, level = quality.level.label(), "analysis assessed");
                let mut report = StageReport::new(stage, output.clone());
                report.quality = Some(quality.clone());
                let outcome = StageOutcome {
                    output,
                    review,
                    quality: Some(quality),
                    completeness: None,
                };
                (outcome, report)
            }
            Stage::TestPointDesign => {
                let output = self
                    .llm
                    .complete(&prompts::test_points(&input, knowledge.as_deref(), extra))
                    .await
                    .context("Test point design failed")?;
                if parse_test_points(&output).is_empty() {
                    warnings.push("no test points could be parsed from the output".to_string());
                }
                let review = if validate {
                    Some(self.review(prompts::test_points_review(&input, &output), &mut warnings).await)
                } else {
                    None
                };
                let outcome = StageOutcome {
                    output: output.clone(),
                    review,
                    ..StageOutcome::default()
                };
                (outcome, StageReport::new(stage, output))
            }
            Stage::TestCaseSynthesis => {
                let (output, report) = self
                    .synthesize(&input, &session.summary, knowledge.as_deref(), extra, &mut warnings)
                    .await?;
                let review = if validate {
                    Some(
                        self.review(
                            prompts::test_cases_review(&input, &output, &report.summary()),
                            &mut warnings,
                        )
                        .await,
                    )
                } else {
                    None
                };
                let mut stage_report = StageReport::new(stage, output.clone());
                stage_report.completeness = Some(report.clone());
                let outcome = StageOutcome {
                    output,
                    review,
                    quality: None,
                    completeness: Some(report),
                };
                (outcome, stage_report)
            }
            Stage::NotStarted | Stage::Export => return Err(StageError::NotGenerative(stage).into()),
        };

        report.review = outcome.review.clone();
        report.warnings = warnings;
        session.commit(stage, outcome)?;
        Ok(report)
    }

    /// Generate test cases point by point. Individual failures are
    /// recorded; the attempt fails only when no point succeeds.
    async fn synthesize(
        &self,
        points_text: &str,
        analysis: &str,
        knowledge: Option<&str>,
        extra: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> Result<(String, CompletenessReport)> {
        let points = parse_test_points(points_text);
        if points.is_empty() {
            bail!("No test points could be parsed from the test point design");
        }
        info!(points = points.len(), "generating test cases per test point");

        let mut results = Vec::with_capacity(points.len());
        for point in &points {
            let messages = prompts::test_cases_for_point(point, analysis, knowledge, extra);
            let output = match self.llm.complete(&messages).await {
                Ok(text) if !text.trim().is_empty() => Ok(text),
                Ok(_) => Err("empty output".to_string()),
                Err(e) => Err(format!("{:#}", e)),
            };
            if let Err(e) = &output {
                warn!(point = %point.id, error = %e, "test point generation failed");
                warnings.push(format!("{}: {}", point.id, e));
            }
            results.push(PointResult {
                point: point.clone(),
                output,
            });
        }

        let report = completeness(&points, &results);
        if report.covered == 0 {
            let first = report
                .failures
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            bail!(
                "Test case generation failed for all {} test points: {}",
                report.total,
                first
            );
        }
        info!(
            covered = report.covered,
            total = report.total,
            "test case synthesis complete"
        );
        Ok((assemble_artifact(&results), report))
    }

    async fn grounding(&self, stage: Stage, input: &str, warnings: &mut Vec<String>) -> Option<String> {
        let kb = self.kb.as_ref()?;
        let queries = prompts::grounding_queries(input, grounding_topic(stage));
        match kb.grounding_context(&queries, self.grounding_k).await {
            Ok(context) => context,
            Err(e) => {
                warn!(stage = %stage, error = %format!("{:#}", e), "knowledge grounding failed");
                warnings.push(format!("knowledge retrieval failed: {:#}", e));
                None
            }
        }
    }

    async fn review(&self, messages: Vec<ChatMessage>, warnings: &mut Vec<String>) -> String {
        match self.llm.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "validation call failed");
                warnings.push("validation call failed".to_string());
                format!("validation unavailable: {:#}", e)
            }
        }
    }

    /// Parse the test-case artifact and write the spreadsheet.
    pub async fn export(&self, session: &mut PipelineSession) -> Result<StageReport> {
        let text = session.input_for(Stage::Export)?.to_string();
        let name = session
            .document_name
            .clone()
            .unwrap_or_else(|| "document".to_string());

        let export = export_test_cases(&self.outputs_dir, &name, &text, &self.row_defaults)
            .await
            .context("Export failed")?;
        info!(path = %export.path.display(), rows = export.rows, "exported test cases");

        let mut report = StageReport::new(Stage::Export, export.path.display().to_string());
        if export.tier != ParseTier::Table {
            report.warnings.push(format!(
                "test cases were not a well-formed table; exported with {:?} fallback",
                export.tier
            ));
        }
        session.commit(
            Stage::Export,
            StageOutcome {
                output: export.path.display().to_string(),
                ..StageOutcome::default()
            },
        )?;
        report.export = Some(export);
        Ok(report)
    }

    /// Run every remaining stage, confirming each output unchanged.
    pub async fn run_all(&self, session: &mut PipelineSession, opts: &RunOptions) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for stage in [
            Stage::DocumentAnalysis,
            Stage::TestPointDesign,
            Stage::TestCaseSynthesis,
        ] {
            reports.push(self.run_stage(session, stage, opts).await?);
            session.confirm(stage, None)?;
        }
        reports.push(self.export(session).await?);
        Ok(reports)
    }
}

/// Save the session as a record, once. Later calls only refresh the
/// output file columns.
pub async fn save_record(store: &RecordStore, session: &mut PipelineSession) -> Result<i64> {
    let output_path = session.export_path.clone();
    let output_filename = output_path.as_deref().and_then(|p| {
        std::path::Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });

    if let Some(id) = session.record_id {
        if let (Some(name), Some(path)) = (&output_filename, &output_path) {
            store.set_record_output(id, name, path).await?;
        }
        return Ok(id);
    }

    let record = NewRecord {
        original_filename: session
            .document_name
            .clone()
            .unwrap_or_else(|| "document".to_string()),
        file_path: session.file_path.clone(),
        output_filename,
        output_path,
        summary: session.summary.clone(),
        test_points: session.test_points.clone(),
        analysis_report: session.quality.as_ref().map(|q| q.to_markdown()),
        test_cases: session.test_cases.clone(),
        validation_report: session.validation_report.clone(),
    };
    let id = store.add_record(&record).await?;
    session.record_id = Some(id);
    info!(record = id, session = %session.id, "saved generation record");
    Ok(id)
}

/// Path of a record's spreadsheet, regenerating it from the stored test
/// cases when the original file is gone.
pub async fn export_record(store: &RecordStore, config: &Config, record: &Record) -> Result<PathBuf> {
    if let Some(path) = record.output_path.as_deref().map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
    }
    anyhow::ensure!(
        !record.test_cases.trim().is_empty(),
        "Record {} has no test cases to export",
        record.id
    );
    let export = export_test_cases(
        &config.outputs_dir(),
        &record.original_filename,
        &record.test_cases,
        &config.export.row_defaults(),
    )
    .await?;
    store
        .set_record_output(record.id, &export.file_name, &export.path.display().to_string())
        .await?;
    Ok(export.path)
}
