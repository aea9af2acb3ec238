//! `casegen records ...`, `casegen feedback ...` and `casegen qa ...`
//! commands.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};

use crate::config::Config;
use crate::export::{export_feedback, feedback_file_name};
use crate::generate::export_record;
use crate::records::RecordStore;
use crate::{db, migrate};

async fn open(config: &Config) -> Result<RecordStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(RecordStore::new(pool))
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = open(config).await?;
    let records = store.list_records().await?;
    store.pool().close().await;

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }
    for record in records {
        println!(
            "{:>4}  {}  {}  {}",
            record.id,
            record.created_at,
            record.original_filename,
            record.output_filename.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, id: i64) -> Result<()> {
    let store = open(config).await?;
    let record = store.get_record(id).await?;
    store.pool().close().await;

    let Some(record) = record else {
        bail!("Record not found: {}", id);
    };
    println!("# Record {} ({})", record.id, record.original_filename);
    println!("created: {}", record.created_at);
    if let Some(path) = &record.output_path {
        println!("spreadsheet: {}", path);
    }
    let sections = [
        ("Document analysis", Some(record.summary.as_str())),
        ("Analysis quality", record.analysis_report.as_deref()),
        ("Test points", Some(record.test_points.as_str())),
        ("Test cases", Some(record.test_cases.as_str())),
        ("Validation", record.validation_report.as_deref()),
    ];
    for (title, body) in sections {
        if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
            println!("\n## {}\n\n{}", title, body.trim());
        }
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: i64, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete record {} without --yes", id);
    }
    let store = open(config).await?;
    let deleted = store.delete_record(id).await?;
    store.pool().close().await;

    if !deleted {
        bail!("Record not found: {}", id);
    }
    println!("Deleted record {}.", id);
    Ok(())
}

pub async fn run_export(config: &Config, id: i64) -> Result<()> {
    let store = open(config).await?;
    let Some(record) = store.get_record(id).await? else {
        store.pool().close().await;
        bail!("Record not found: {}", id);
    };
    let path = export_record(&store, config, &record).await?;
    store.pool().close().await;
    println!("{}", path.display());
    Ok(())
}

/// Write feedback submitted between `start` and `end` (inclusive) to a
/// workbook. Defaults to `<outputs>/feedback_<start>_<end>.xlsx`.
pub async fn run_feedback_export(
    config: &Config,
    start: NaiveDate,
    end: NaiveDate,
    output: Option<PathBuf>,
) -> Result<()> {
    if start > end {
        bail!("--start {} is after --end {}", start, end);
    }
    let store = open(config).await?;
    let feedback = store.feedback_between(start, end).await?;
    store.pool().close().await;

    if feedback.is_empty() {
        println!("No feedback between {} and {}.", start, end);
        return Ok(());
    }
    let path = match output {
        Some(path) => path,
        None => {
            let dir = config.outputs_dir();
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            dir.join(feedback_file_name(start, end))
        }
    };
    let rows = feedback.len();
    export_feedback(&path, feedback).await?;
    println!("{} ({} rows)", path.display(), rows);
    Ok(())
}

pub async fn run_qa_stats(config: &Config, date: Option<NaiveDate>, days: u32) -> Result<()> {
    let today = Utc::now().date_naive();
    let store = open(config).await?;
    let stats = store.qa_daily_stats(date.unwrap_or(today)).await?;
    let frequency = store.question_frequency(today, days).await?;
    store.pool().close().await;

    println!("Q&A on {}", stats.date);
    println!("  answers:       {}", stats.total_qa);
    println!("  upvotes:       {} (avg {:.2})", stats.total_upvotes, stats.avg_upvotes);
    println!("  downvotes:     {} (avg {:.2})", stats.total_downvotes, stats.avg_downvotes);
    println!("  feedback rate: {:.2}", stats.feedback_rate);
    println!(
        "\nTop questions, last {} days ({} unique):",
        frequency.days, frequency.total_unique_questions
    );
    for entry in &frequency.most_frequent {
        println!("  {:>3}  {}", entry.count, entry.question);
    }
    Ok(())
}
