//! `casegen generate` and `casegen ask`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use casegen_core::pipeline::PipelineSession;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generate::{save_record, Generator, RunOptions};
use crate::knowledge::KnowledgeBase;
use crate::llm::{LlmClient, OpenAiCompatClient};
use crate::qa;
use crate::records::RecordStore;
use crate::{db, migrate};

struct Services {
    kb: Arc<KnowledgeBase>,
    records: RecordStore,
    llm: Arc<dyn LlmClient>,
}

async fn open(config: &Config) -> Result<Services> {
    config.ensure_dirs()?;
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let provider = create_provider(&config.embedding)?;
    let kb = Arc::new(KnowledgeBase::open(config, provider).await?);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(&config.llm)?);
    Ok(Services {
        kb,
        records: RecordStore::new(pool),
        llm,
    })
}

/// Run every stage on `document`, export the spreadsheet and save a record.
pub async fn run_generate(
    config: &Config,
    document: &Path,
    validate: bool,
    prompt: Option<String>,
    use_knowledge: bool,
) -> Result<()> {
    let services = open(config).await?;
    let name = document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let text = services
        .kb
        .extractors()
        .extract_text(document)
        .with_context(|| format!("Failed to read {}", document.display()))?;
    if text.trim().is_empty() {
        bail!("No text could be extracted from {}", document.display());
    }

    let mut session = PipelineSession::new(Uuid::new_v4().to_string(), Utc::now());
    session.load_document(&name, Some(document.display().to_string()), text);

    let generator = Generator::new(config, services.llm.clone(), Some(services.kb.clone()));
    let opts = RunOptions {
        validate,
        prompt,
        use_knowledge,
    };
    let reports = generator.run_all(&mut session, &opts).await?;
    let record_id = save_record(&services.records, &mut session).await?;
    services.records.pool().close().await;

    println!("generate {}", name);
    for report in &reports {
        println!("  {}: {} chars", report.stage.label(), report.output.chars().count());
        if let Some(quality) = &report.quality {
            println!(
                "    quality: {:.1} ({})",
                quality.overall_score,
                quality.level.label()
            );
        }
        if let Some(completeness) = &report.completeness {
            println!("    {}", completeness.summary());
            for failure in &completeness.failures {
                println!("    failed: {}: {}", failure.id, failure.error);
            }
        }
        if let Some(export) = &report.export {
            println!("    rows: {}", export.rows);
        }
        for warning in &report.warnings {
            println!("    warning: {}", warning);
        }
    }
    if let Some(path) = &session.export_path {
        println!("  spreadsheet: {}", path);
    }
    println!("  record: {}", record_id);
    Ok(())
}

pub async fn run_ask(config: &Config, question: &str, references: Option<usize>) -> Result<()> {
    let services = open(config).await?;
    let answer = qa::ask(
        &services.kb,
        services.llm.as_ref(),
        &services.records,
        question,
        None,
        references.unwrap_or(config.retrieval.default_k),
    )
    .await?;
    services.records.pool().close().await;

    println!("{}", answer.answer.trim());
    if !answer.references.is_empty() {
        println!();
        println!("References:");
        for (i, reference) in answer.references.iter().enumerate() {
            let first_line = reference.lines().next().unwrap_or_default();
            println!("  [{}] {}", i + 1, first_line);
        }
    }
    Ok(())
}
