use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database and schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per completed generation run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_filename TEXT NOT NULL,
            file_path TEXT,
            output_filename TEXT,
            output_path TEXT,
            summary TEXT NOT NULL DEFAULT '',
            test_points TEXT NOT NULL DEFAULT '',
            analysis_report TEXT,
            test_cases TEXT NOT NULL DEFAULT '',
            validation_report TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL UNIQUE,
            content_hash TEXT,
            uploaded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            reference_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id INTEGER,
            generator_name TEXT NOT NULL,
            adoption_rate REAL NOT NULL,
            time_saved_hours REAL NOT NULL,
            problem_feedback TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One vote per voter per answer; a changed vote replaces the old one
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa_votes (
            qa_id INTEGER NOT NULL,
            voter TEXT NOT NULL,
            vote TEXT NOT NULL CHECK (vote IN ('upvote', 'downvote')),
            voted_at INTEGER NOT NULL,
            PRIMARY KEY (qa_id, voter)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_qa_records_created_at ON qa_records(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_feedback_created_at ON feedback(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
