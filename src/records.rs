//! SQLite-backed record store.
//!
//! Persists completed generation runs, knowledge-file metadata, Q&A
//! history, and user feedback. Deleting a record or knowledge file also
//! removes its file on disk on a best-effort basis; a missing file is not
//! an error. Knowledge-file deletion never touches the vector index: the
//! caller decides when to rebuild.
//!
//! Timestamps are stored as Unix seconds. Day-based queries (feedback
//! export, Q&A statistics) use UTC calendar days.

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A completed generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub output_filename: Option<String>,
    pub output_path: Option<String>,
    pub summary: String,
    pub test_points: String,
    pub analysis_report: Option<String>,
    pub test_cases: String,
    pub validation_report: Option<String>,
    pub created_at: String,
}

/// Fields for a new [`Record`].
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub original_filename: String,
    pub file_path: Option<String>,
    pub output_filename: Option<String>,
    pub output_path: Option<String>,
    pub summary: String,
    pub test_points: String,
    pub analysis_report: Option<String>,
    pub test_cases: String,
    pub validation_report: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub content_hash: Option<String>,
    pub uploaded_at: String,
    /// Whether the file is still on disk, checked at read time.
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub reference_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Upvote,
    Downvote,
}

impl Vote {
    pub fn as_str(self) -> &'static str {
        match self {
            Vote::Upvote => "upvote",
            Vote::Downvote => "downvote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Recorded,
    /// The voter switched sides; the old vote no longer counts.
    Changed,
    /// Same vote as before; nothing stored.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaDailyStats {
    pub date: String,
    pub total_qa: i64,
    pub total_upvotes: i64,
    pub total_downvotes: i64,
    pub avg_upvotes: f64,
    pub avg_downvotes: f64,
    /// Votes per answer.
    pub feedback_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionCount {
    pub question: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionFrequency {
    pub days: u32,
    pub total_unique_questions: usize,
    /// Most asked first, at most ten.
    pub most_frequent: Vec<QuestionCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: i64,
    pub record_id: Option<i64>,
    pub generator_name: String,
    pub adoption_rate: f64,
    pub time_saved_hours: f64,
    pub problem_feedback: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFeedback {
    pub record_id: Option<i64>,
    pub generator_name: String,
    pub adoption_rate: f64,
    pub time_saved_hours: f64,
    pub problem_feedback: Option<String>,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `[start, end)` of a UTC calendar day in Unix seconds.
fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let start = date.and_time(NaiveTime::default()).and_utc().timestamp();
    (start, start + 86_400)
}

const QA_SELECT: &str = r#"
    SELECT q.id, q.question, q.answer, q.reference_count, q.created_at,
           (SELECT COUNT(*) FROM qa_votes v WHERE v.qa_id = q.id AND v.vote = 'upvote') AS upvotes,
           (SELECT COUNT(*) FROM qa_votes v WHERE v.qa_id = q.id AND v.vote = 'downvote') AS downvotes
    FROM qa_records q
"#;

fn qa_from_row(row: &SqliteRow) -> QaRecord {
    QaRecord {
        id: row.get("id"),
        question: row.get("question"),
        answer: row.get("answer"),
        reference_count: row.get("reference_count"),
        upvotes: row.get("upvotes"),
        downvotes: row.get("downvotes"),
        created_at: format_ts_iso(row.get("created_at")),
    }
}

fn feedback_from_row(row: &SqliteRow) -> Feedback {
    Feedback {
        id: row.get("id"),
        record_id: row.get("record_id"),
        generator_name: row.get("generator_name"),
        adoption_rate: row.get("adoption_rate"),
        time_saved_hours: row.get("time_saved_hours"),
        problem_feedback: row.get("problem_feedback"),
        created_at: format_ts_iso(row.get("created_at")),
    }
}

/// SHA-256 of a file's contents, hex encoded.
pub fn file_hash(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// [`file_hash`] on the blocking pool; `None` when the file is unreadable.
async fn hash_in_background(path: &str) -> Option<String> {
    let path = PathBuf::from(path);
    tokio::task::spawn_blocking(move || file_hash(&path).ok())
        .await
        .ok()
        .flatten()
}

fn remove_file_best_effort(path: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path, error = %e, "failed to remove file"),
    }
}

fn record_from_row(row: &SqliteRow) -> Record {
    Record {
        id: row.get("id"),
        original_filename: row.get("original_filename"),
        file_path: row.get("file_path"),
        output_filename: row.get("output_filename"),
        output_path: row.get("output_path"),
        summary: row.get("summary"),
        test_points: row.get("test_points"),
        analysis_report: row.get("analysis_report"),
        test_cases: row.get("test_cases"),
        validation_report: row.get("validation_report"),
        created_at: format_ts_iso(row.get("created_at")),
    }
}

fn knowledge_file_from_row(row: &SqliteRow) -> KnowledgeFile {
    let file_path: String = row.get("file_path");
    KnowledgeFile {
        id: row.get("id"),
        filename: row.get("filename"),
        exists: Path::new(&file_path).exists(),
        file_path,
        content_hash: row.get("content_hash"),
        uploaded_at: format_ts_iso(row.get("uploaded_at")),
    }
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Generation records ============

    pub async fn add_record(&self, record: &NewRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO records (original_filename, file_path, output_filename, output_path,
                                 summary, test_points, analysis_report, test_cases,
                                 validation_report, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.original_filename)
        .bind(&record.file_path)
        .bind(&record.output_filename)
        .bind(&record.output_path)
        .bind(&record.summary)
        .bind(&record.test_points)
        .bind(&record.analysis_report)
        .bind(&record.test_cases)
        .bind(&record.validation_report)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .context("Failed to save generation record")?;

        Ok(result.last_insert_rowid())
    }

    /// All records, newest first.
    pub async fn list_records(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query("SELECT * FROM records ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<Record>> {
        let row = sqlx::query("SELECT * FROM records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    /// Delete a record and, best-effort, its exported file.
    ///
    /// Returns false when no such record exists.
    pub async fn delete_record(&self, id: i64) -> Result<bool> {
        let Some(record) = self.get_record(id).await? else {
            return Ok(false);
        };
        sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if let Some(path) = &record.output_path {
            remove_file_best_effort(path);
        }
        Ok(true)
    }

    /// Point a record at a freshly written export file.
    pub async fn set_record_output(&self, id: i64, filename: &str, path: &str) -> Result<()> {
        sqlx::query("UPDATE records SET output_filename = ?, output_path = ? WHERE id = ?")
            .bind(filename)
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Knowledge files ============

    /// Register a knowledge file. Re-adding the same path is a no-op.
    ///
    /// Returns the id of the (new or existing) row.
    pub async fn add_knowledge_file(&self, filename: &str, file_path: &str) -> Result<i64> {
        let hash = hash_in_background(file_path).await;
        sqlx::query(
            "INSERT OR IGNORE INTO knowledge_files (filename, file_path, content_hash, uploaded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(filename)
        .bind(file_path)
        .bind(&hash)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM knowledge_files WHERE file_path = ?")
            .bind(file_path)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Refresh the stored content hash after a re-upload or rebuild.
    pub async fn refresh_knowledge_hash(&self, file_path: &str) -> Result<()> {
        let hash = hash_in_background(file_path).await;
        sqlx::query("UPDATE knowledge_files SET content_hash = ? WHERE file_path = ?")
            .bind(&hash)
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_knowledge_files(&self) -> Result<Vec<KnowledgeFile>> {
        let rows = sqlx::query("SELECT * FROM knowledge_files ORDER BY uploaded_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(knowledge_file_from_row).collect())
    }

    pub async fn get_knowledge_file(&self, id: i64) -> Result<Option<KnowledgeFile>> {
        let row = sqlx::query("SELECT * FROM knowledge_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(knowledge_file_from_row))
    }

    /// Delete the metadata row and, best-effort, the file itself.
    pub async fn delete_knowledge_file(&self, id: i64) -> Result<Option<KnowledgeFile>> {
        let Some(file) = self.get_knowledge_file(id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM knowledge_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        remove_file_best_effort(&file.file_path);
        Ok(Some(file))
    }

    pub async fn knowledge_file_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ============ Q&A history ============

    pub async fn add_qa(&self, question: &str, answer: &str, reference_count: usize) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO qa_records (question, answer, reference_count, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(question)
        .bind(answer)
        .bind(reference_count as i64)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_qa(&self, limit: i64) -> Result<Vec<QaRecord>> {
        let sql = format!("{} ORDER BY q.created_at DESC, q.id DESC LIMIT ?", QA_SELECT);
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(qa_from_row).collect())
    }

    pub async fn get_qa(&self, id: i64) -> Result<Option<QaRecord>> {
        let sql = format!("{} WHERE q.id = ?", QA_SELECT);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(qa_from_row))
    }

    pub async fn delete_qa(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM qa_votes WHERE qa_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM qa_records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record `voter`'s vote on an answer. Returns `None` when the answer
    /// does not exist.
    pub async fn vote_qa(&self, qa_id: i64, voter: &str, vote: Vote) -> Result<Option<VoteOutcome>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM qa_records WHERE id = ?")
            .bind(qa_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let previous: Option<String> =
            sqlx::query_scalar("SELECT vote FROM qa_votes WHERE qa_id = ? AND voter = ?")
                .bind(qa_id)
                .bind(voter)
                .fetch_optional(&self.pool)
                .await?;
        let outcome = match previous.as_deref() {
            Some(v) if v == vote.as_str() => return Ok(Some(VoteOutcome::Unchanged)),
            Some(_) => VoteOutcome::Changed,
            None => VoteOutcome::Recorded,
        };

        sqlx::query(
            r#"
            INSERT INTO qa_votes (qa_id, voter, vote, voted_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(qa_id, voter) DO UPDATE SET vote = excluded.vote, voted_at = excluded.voted_at
            "#,
        )
        .bind(qa_id)
        .bind(voter)
        .bind(vote.as_str())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(Some(outcome))
    }

    /// Answers and votes for the answers given on `date`.
    pub async fn qa_daily_stats(&self, date: NaiveDate) -> Result<QaDailyStats> {
        let (start, end) = day_bounds(date);
        let total_qa: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM qa_records WHERE created_at >= ? AND created_at < ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        let (total_upvotes, total_downvotes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN v.vote = 'upvote' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN v.vote = 'downvote' THEN 1 ELSE 0 END), 0)
            FROM qa_votes v JOIN qa_records q ON q.id = v.qa_id
            WHERE q.created_at >= ? AND q.created_at < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        let answers = total_qa.max(1) as f64;
        Ok(QaDailyStats {
            date: date.format("%Y-%m-%d").to_string(),
            total_qa,
            total_upvotes,
            total_downvotes,
            avg_upvotes: total_upvotes as f64 / answers,
            avg_downvotes: total_downvotes as f64 / answers,
            feedback_rate: (total_upvotes + total_downvotes) as f64 / answers,
        })
    }

    /// How often each question was asked over the `days` days ending on
    /// `today`.
    pub async fn question_frequency(&self, today: NaiveDate, days: u32) -> Result<QuestionFrequency> {
        let days = days.max(1);
        let first = today
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);
        let (since, _) = day_bounds(first);
        let (_, until) = day_bounds(today);

        let counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT question, COUNT(*) AS n FROM qa_records
            WHERE created_at >= ? AND created_at < ?
            GROUP BY question
            ORDER BY n DESC, question ASC
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(QuestionFrequency {
            days,
            total_unique_questions: counts.len(),
            most_frequent: counts
                .into_iter()
                .take(10)
                .map(|(question, count)| QuestionCount { question, count })
                .collect(),
        })
    }

    // ============ Feedback ============

    pub async fn add_feedback(&self, feedback: &NewFeedback) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO feedback (record_id, generator_name, adoption_rate, time_saved_hours,
                                  problem_feedback, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback.record_id)
        .bind(&feedback.generator_name)
        .bind(feedback.adoption_rate)
        .bind(feedback.time_saved_hours)
        .bind(&feedback.problem_feedback)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_feedback(&self) -> Result<Vec<Feedback>> {
        let rows = sqlx::query("SELECT * FROM feedback ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(feedback_from_row).collect())
    }

    /// Feedback submitted from the start of `start` to the end of `end`
    /// (both inclusive), oldest first.
    pub async fn feedback_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Feedback>> {
        let (from, _) = day_bounds(start);
        let (_, until) = day_bounds(end);
        let rows = sqlx::query(
            "SELECT * FROM feedback WHERE created_at >= ? AND created_at < ? ORDER BY created_at, id",
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(feedback_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    async fn store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_data_dir(tmp.path());
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, RecordStore::new(pool))
    }

    fn new_record(name: &str) -> NewRecord {
        NewRecord {
            original_filename: name.to_string(),
            summary: "summary".to_string(),
            test_points: "TP-001".to_string(),
            test_cases: "| TC-001 | a | b |".to_string(),
            ..NewRecord::default()
        }
    }

    #[tokio::test]
    async fn test_records_newest_first() {
        let (_tmp, store) = store().await;
        let first = store.add_record(&new_record("a.docx")).await.unwrap();
        let second = store.add_record(&new_record("b.docx")).await.unwrap();
        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second);
        assert_eq!(records[1].id, first);
        assert_eq!(
            store.get_record(first).await.unwrap().unwrap().original_filename,
            "a.docx"
        );
    }

    #[tokio::test]
    async fn test_delete_record_removes_output_file() {
        let (tmp, store) = store().await;
        let output = tmp.path().join("out.xlsx");
        std::fs::write(&output, b"xlsx").unwrap();
        let mut record = new_record("a.docx");
        record.output_path = Some(output.display().to_string());
        let id = store.add_record(&record).await.unwrap();

        assert!(store.delete_record(id).await.unwrap());
        assert!(!output.exists());
        assert!(store.get_record(id).await.unwrap().is_none());
        assert!(!store.delete_record(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_record_tolerates_missing_file() {
        let (_tmp, store) = store().await;
        let mut record = new_record("a.docx");
        record.output_path = Some("/nonexistent/out.xlsx".to_string());
        let id = store.add_record(&record).await.unwrap();
        assert!(store.delete_record(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_knowledge_file_path_unique() {
        let (tmp, store) = store().await;
        let path = tmp.path().join("rules.txt");
        std::fs::write(&path, "rule").unwrap();
        let p = path.display().to_string();

        let a = store.add_knowledge_file("rules.txt", &p).await.unwrap();
        let b = store.add_knowledge_file("rules.txt", &p).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.knowledge_file_count().await.unwrap(), 1);

        let files = store.list_knowledge_files().await.unwrap();
        assert!(files[0].exists);
        assert!(files[0].content_hash.is_some());

        std::fs::remove_file(&path).unwrap();
        assert!(!store.list_knowledge_files().await.unwrap()[0].exists);
    }

    #[tokio::test]
    async fn test_delete_knowledge_file() {
        let (tmp, store) = store().await;
        let path = tmp.path().join("rules.txt");
        std::fs::write(&path, "rule").unwrap();
        let id = store
            .add_knowledge_file("rules.txt", &path.display().to_string())
            .await
            .unwrap();

        let removed = store.delete_knowledge_file(id).await.unwrap();
        assert_eq!(removed.unwrap().filename, "rules.txt");
        assert!(!path.exists());
        assert_eq!(store.knowledge_file_count().await.unwrap(), 0);
        assert!(store.delete_knowledge_file(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_qa_and_feedback() {
        let (_tmp, store) = store().await;
        let qa = store.add_qa("How long?", "8 chars", 2).await.unwrap();
        assert_eq!(store.list_qa(10).await.unwrap()[0].reference_count, 2);
        assert!(store.delete_qa(qa).await.unwrap());
        assert!(store.list_qa(10).await.unwrap().is_empty());

        store
            .add_feedback(&NewFeedback {
                record_id: None,
                generator_name: "alice".to_string(),
                adoption_rate: 0.8,
                time_saved_hours: 2.5,
                problem_feedback: None,
            })
            .await
            .unwrap();
        let feedback = store.list_feedback().await.unwrap();
        assert_eq!(feedback[0].generator_name, "alice");
        assert_eq!(feedback[0].adoption_rate, 0.8);
    }

    fn ts(date: &str, hms: (u32, u32, u32)) -> i64 {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    async fn qa_at(store: &RecordStore, question: &str, created_at: i64) -> i64 {
        let id = store.add_qa(question, "answer", 1).await.unwrap();
        sqlx::query("UPDATE qa_records SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_one_vote_per_voter() {
        let (_tmp, store) = store().await;
        let qa = store.add_qa("Max length?", "16", 0).await.unwrap();

        assert_eq!(store.vote_qa(qa, "bob", Vote::Upvote).await.unwrap(), Some(VoteOutcome::Recorded));
        assert_eq!(store.vote_qa(qa, "bob", Vote::Upvote).await.unwrap(), Some(VoteOutcome::Unchanged));
        assert_eq!(store.vote_qa(qa, "carol", Vote::Upvote).await.unwrap(), Some(VoteOutcome::Recorded));
        let record = store.get_qa(qa).await.unwrap().unwrap();
        assert_eq!((record.upvotes, record.downvotes), (2, 0));

        assert_eq!(store.vote_qa(qa, "bob", Vote::Downvote).await.unwrap(), Some(VoteOutcome::Changed));
        let record = store.list_qa(10).await.unwrap().remove(0);
        assert_eq!((record.upvotes, record.downvotes), (1, 1));

        assert_eq!(store.vote_qa(qa + 100, "bob", Vote::Upvote).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_qa_drops_votes() {
        let (_tmp, store) = store().await;
        let qa = store.add_qa("q", "a", 0).await.unwrap();
        store.vote_qa(qa, "bob", Vote::Upvote).await.unwrap();
        assert!(store.delete_qa(qa).await.unwrap());

        let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qa_votes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(votes, 0);
    }

    #[tokio::test]
    async fn test_qa_daily_stats() {
        let (_tmp, store) = store().await;
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let a = qa_at(&store, "q1", ts("2026-03-10", (0, 0, 0))).await;
        let b = qa_at(&store, "q2", ts("2026-03-10", (23, 59, 59))).await;
        let other = qa_at(&store, "q3", ts("2026-03-11", (0, 0, 0))).await;
        store.vote_qa(a, "bob", Vote::Upvote).await.unwrap();
        store.vote_qa(a, "carol", Vote::Upvote).await.unwrap();
        store.vote_qa(b, "bob", Vote::Downvote).await.unwrap();
        store.vote_qa(other, "bob", Vote::Downvote).await.unwrap();

        let stats = store.qa_daily_stats(day).await.unwrap();
        assert_eq!(stats.date, "2026-03-10");
        assert_eq!(stats.total_qa, 2);
        assert_eq!((stats.total_upvotes, stats.total_downvotes), (2, 1));
        assert_eq!(stats.avg_upvotes, 1.0);
        assert_eq!(stats.avg_downvotes, 0.5);
        assert_eq!(stats.feedback_rate, 1.5);

        let empty = store.qa_daily_stats(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()).await.unwrap();
        assert_eq!(empty.total_qa, 0);
        assert_eq!(empty.feedback_rate, 0.0);
    }

    #[tokio::test]
    async fn test_question_frequency_window() {
        let (_tmp, store) = store().await;
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        qa_at(&store, "password rule?", ts("2026-03-10", (9, 0, 0))).await;
        qa_at(&store, "password rule?", ts("2026-03-04", (9, 0, 0))).await;
        qa_at(&store, "lockout?", ts("2026-03-08", (9, 0, 0))).await;
        // Outside a 7-day window ending on the 10th.
        qa_at(&store, "lockout?", ts("2026-03-03", (23, 0, 0))).await;
        qa_at(&store, "lockout?", ts("2026-03-11", (0, 0, 1))).await;

        let freq = store.question_frequency(today, 7).await.unwrap();
        assert_eq!(freq.days, 7);
        assert_eq!(freq.total_unique_questions, 2);
        assert_eq!(
            freq.most_frequent,
            vec![
                QuestionCount { question: "password rule?".to_string(), count: 2 },
                QuestionCount { question: "lockout?".to_string(), count: 1 },
            ]
        );

        let single = store.question_frequency(today, 0).await.unwrap();
        assert_eq!(single.days, 1);
        assert_eq!(single.total_unique_questions, 1);
    }

    #[tokio::test]
    async fn test_feedback_between_is_inclusive() {
        let (_tmp, store) = store().await;
        for (name, at) in [
            ("before", ts("2026-02-28", (23, 59, 59))),
            ("first", ts("2026-03-01", (0, 0, 0))),
            ("last", ts("2026-03-02", (23, 59, 59))),
            ("after", ts("2026-03-03", (0, 0, 0))),
        ] {
            let id = store
                .add_feedback(&NewFeedback {
                    record_id: None,
                    generator_name: name.to_string(),
                    adoption_rate: 0.5,
                    time_saved_hours: 1.0,
                    problem_feedback: None,
                })
                .await
                .unwrap();
            sqlx::query("UPDATE feedback SET created_at = ? WHERE id = ?")
                .bind(at)
                .bind(id)
                .execute(store.pool())
                .await
                .unwrap();
        }

        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let rows = store.feedback_between(start, end).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|f| f.generator_name.as_str()).collect();
        assert_eq!(names, ["first", "last"]);
        assert!(store.feedback_between(end, end).await.unwrap().len() == 1);
    }
}
