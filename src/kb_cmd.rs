//! `casegen kb ...` commands.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::knowledge::KnowledgeBase;
use crate::records::RecordStore;
use crate::{db, migrate};

async fn open(config: &Config) -> Result<(KnowledgeBase, RecordStore)> {
    config.ensure_dirs()?;
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let provider = create_provider(&config.embedding)?;
    let kb = KnowledgeBase::open(config, provider).await?;
    Ok((kb, RecordStore::new(pool)))
}

pub async fn run_add(config: &Config, files: &[PathBuf]) -> Result<()> {
    let (kb, records) = open(config).await?;
    let report = kb.add_files(files).await;

    println!("kb add");
    for ingested in &report.succeeded {
        let path = ingested.path.display().to_string();
        records.add_knowledge_file(&ingested.source, &path).await?;
        records.refresh_knowledge_hash(&path).await?;
        println!("  added: {} ({} chunks)", ingested.source, ingested.chunks);
    }
    for failure in &report.failed {
        println!("  failed: {}: {}", failure.file, failure.error);
    }
    println!(
        "  files: {} added, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );

    records.pool().close().await;
    if report.succeeded.is_empty() && !report.failed.is_empty() {
        bail!("No files were added to the knowledge base");
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    min_similarity: Option<f64>,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Query must not be empty");
    }
    let (kb, records) = open(config).await?;
    let k = k.unwrap_or(config.retrieval.default_k);
    let floor = min_similarity.unwrap_or(config.retrieval.min_similarity);
    let hits = kb.search(query, k, Some(floor)).await?;
    records.pool().close().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.1}%] {}", i + 1, hit.similarity, hit.metadata.source);
        match (&hit.metadata.sheet, hit.metadata.row) {
            (Some(sheet), Some(row)) => println!("    sheet: {}, row {}", sheet, row),
            (Some(sheet), None) => println!("    sheet: {}", sheet),
            _ => println!(
                "    chunk: {}/{}",
                hit.metadata.chunk_index + 1,
                hit.metadata.total_chunks
            ),
        }
        println!("    excerpt: \"{}\"", hit.content.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let (kb, records) = open(config).await?;
    let status = kb.get_index_status().await?;
    let file_records = records.knowledge_file_count().await?;
    records.pool().close().await;

    println!("kb status");
    println!("  index exists: {}", status.index_exists);
    println!("  embedding model: {} ({} dims)", status.model, status.dims);
    println!("  indexed chunks: {}", status.document_count);
    println!("  files on disk: {}", status.file_count);
    println!("  file records: {}", file_records);
    for name in &status.unindexed_files {
        println!("  not indexed: {}", name);
    }
    for name in &status.orphaned_sources {
        println!("  orphaned in index: {}", name);
    }
    if status.drifts_from_records(file_records) {
        println!("  drift: yes (run `casegen kb rebuild --yes`)");
    } else {
        println!("  drift: no");
    }
    Ok(())
}

pub async fn run_files(config: &Config) -> Result<()> {
    let (_kb, records) = open(config).await?;
    let files = records.list_knowledge_files().await?;
    records.pool().close().await;

    if files.is_empty() {
        println!("No knowledge files.");
        return Ok(());
    }
    for file in files {
        let missing = if file.exists { "" } else { " (missing)" };
        println!("{:>4}  {}  {}{}", file.id, file.uploaded_at, file.filename, missing);
    }
    Ok(())
}

pub async fn run_remove(config: &Config, id: i64, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to remove knowledge file {} without --yes", id);
    }
    let (_kb, records) = open(config).await?;
    let removed = records.delete_knowledge_file(id).await?;
    records.pool().close().await;

    match removed {
        Some(file) => {
            println!("Removed {} (id {}).", file.filename, file.id);
            println!("The index still contains its chunks; run `casegen kb rebuild --yes` to drop them.");
            Ok(())
        }
        None => bail!("Knowledge file not found: {}", id),
    }
}

pub async fn run_rebuild(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to rebuild the vector index without --yes");
    }
    let (kb, records) = open(config).await?;
    let report = kb.rebuild_index().await?;
    records.pool().close().await;

    println!("kb rebuild");
    println!("  files: {}", report.files);
    println!("  indexed files: {}", report.indexed_files);
    println!("  chunks: {}", report.chunks);
    for failure in &report.failed {
        println!("  failed: {}: {}", failure.file, failure.error);
    }
    Ok(())
}
