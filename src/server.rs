//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `POST`/`GET` | `/sessions` | Create / list sessions |
//! | `GET`/`DELETE` | `/sessions/{id}` | Session overview / remove |
//! | `GET`/`DELETE` | `/sessions/{id}/data` | Full session state / reset |
//! | `POST` | `/documents` | Upload a requirements document (base64) |
//! | `POST` | `/generate` | Run one pipeline stage |
//! | `PUT` | `/sessions/{id}/stages/{stage}` | Edit and confirm a stage output |
//! | `POST` | `/sessions/{id}/stages/{stage}/regenerate` | Clear and rerun a stage |
//! | `POST` | `/sessions/{id}/back` | Return to an earlier stage |
//! | `GET` | `/sessions/{id}/export` | Download the spreadsheet |
//! | `GET` | `/records`, `/records/{id}`, `/records/{id}/export` | Saved runs |
//! | `DELETE` | `/records/{id}` | Delete a saved run |
//! | `POST`/`GET` | `/knowledge/files` | Upload / list knowledge files |
//! | `DELETE` | `/knowledge/files/{id}` | Remove a knowledge file |
//! | `POST` | `/knowledge/rebuild` | Rebuild the vector index |
//! | `GET` | `/knowledge/status`, `/knowledge/search` | Index status / search |
//! | `POST` | `/qa/ask` | Ask the knowledge base |
//! | `GET`/`DELETE` | `/qa/history`, `/qa/history/{id}` | Q&A history |
//! | `POST` | `/qa/history/{id}/feedback` | Upvote / downvote an answer |
//! | `GET` | `/qa/stats`, `/qa/questions` | Daily Q&A stats / question frequency |
//! | `POST`/`GET` | `/feedback` | Usage feedback |
//! | `GET` | `/feedback/export` | Feedback for a date range as `.xlsx` (204 when empty) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "cannot run test_point_design: document_analysis output is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `ingestion_failed` (422), `internal` (500). A stage whose LLM call fails
//! is not an HTTP error: `/generate` answers with `"status": "error"`.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use casegen_core::pipeline::{PipelineSession, Stage, StageError};
use casegen_core::points::CompletenessReport;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generate::{export_record, save_record, Generator, RunOptions, StageReport};
use crate::knowledge::{KnowledgeBase, KnowledgeHit, KnowledgeStatus};
use crate::llm::{LlmClient, OpenAiCompatClient};
use crate::qa;
use crate::export::{feedback_file_name, render_feedback};
use crate::records::{NewFeedback, QaDailyStats, QuestionFrequency, RecordStore, Vote, VoteOutcome};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::{db, migrate};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    sessions: Arc<dyn SessionStore>,
    kb: Arc<KnowledgeBase>,
    generator: Arc<Generator>,
    records: RecordStore,
}

impl AppState {
    /// Open the database, knowledge base and session store.
    pub async fn build(config: &Config, llm: Arc<dyn LlmClient>) -> anyhow::Result<Self> {
        config.ensure_dirs()?;
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let provider = create_provider(&config.embedding)?;
        let kb = Arc::new(KnowledgeBase::open(config, provider).await?);
        let generator = Arc::new(Generator::new(config, llm, Some(kb.clone())));

        Ok(Self {
            config: Arc::new(config.clone()),
            sessions: Arc::new(InMemorySessionStore::new()),
            kb,
            generator,
            records: RecordStore::new(pool),
        })
    }

    async fn sweep(&self) -> anyhow::Result<usize> {
        let ttl = chrono::Duration::hours(self.config.session.ttl_hours);
        let evicted = self.sessions.sweep_expired(Utc::now(), ttl).await?;
        if evicted > 0 {
            info!(evicted, "evicted idle sessions");
        }
        Ok(evicted)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session).get(handle_list_sessions))
        .route("/sessions/{id}", get(handle_get_session).delete(handle_delete_session))
        .route("/sessions/{id}/data", get(handle_session_data).delete(handle_reset_session))
        .route("/sessions/{id}/stages/{stage}", put(handle_edit_stage))
        .route("/sessions/{id}/stages/{stage}/regenerate", post(handle_regenerate))
        .route("/sessions/{id}/back", post(handle_back))
        .route("/sessions/{id}/export", get(handle_export_session))
        .route("/documents", post(handle_upload_document))
        .route("/generate", post(handle_generate))
        .route("/records", get(handle_list_records))
        .route("/records/{id}", get(handle_get_record).delete(handle_delete_record))
        .route("/records/{id}/export", get(handle_export_record))
        .route("/knowledge/files", post(handle_upload_knowledge).get(handle_list_knowledge))
        .route("/knowledge/files/{id}", axum::routing::delete(handle_delete_knowledge))
        .route("/knowledge/rebuild", post(handle_rebuild))
        .route("/knowledge/status", get(handle_knowledge_status))
        .route("/knowledge/search", get(handle_knowledge_search))
        .route("/qa/ask", post(handle_ask))
        .route("/qa/history", get(handle_qa_history))
        .route("/qa/history/{id}", axum::routing::delete(handle_delete_qa))
        .route("/qa/history/{id}/feedback", post(handle_vote_qa))
        .route("/qa/stats", get(handle_qa_stats))
        .route("/qa/questions", get(handle_qa_questions))
        .route("/feedback", post(handle_add_feedback).get(handle_list_feedback))
        .route("/feedback/export", get(handle_export_feedback))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Evict idle sessions every `sweep_interval_secs`.
pub fn spawn_session_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.config.session.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = state.sweep().await {
                warn!(error = %format!("{:#}", e), "session sweep failed");
            }
        }
    })
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(&config.llm)?);
    let state = AppState::build(config, llm).await?;
    spawn_session_sweeper(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, model = %config.llm.model, "casegen server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    error(StatusCode::NOT_FOUND, "not_found", message)
}

fn conflict(message: impl Into<String>) -> AppError {
    error(StatusCode::CONFLICT, "conflict", message)
}

fn internal(message: impl Into<String>) -> AppError {
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<StageError> for AppError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::UnknownStage(_) => bad_request(err.to_string()),
            _ => conflict(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StageError>() {
            Some(stage_err) => stage_err.clone().into(),
            None => internal(format!("{:#}", err)),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn parse_stage(raw: &str) -> Result<Stage, AppError> {
    raw.parse::<Stage>().map_err(AppError::from)
}

/// Final path component of an uploaded name, or `None` if nothing usable.
fn clean_filename(raw: &str) -> Option<String> {
    let name = FsPath::new(raw.trim()).file_name()?.to_string_lossy().into_owned();
    (!name.is_empty() && name != "." && name != "..").then_some(name)
}

fn decode_upload(content_base64: &str) -> Result<Vec<u8>, AppError> {
    STANDARD
        .decode(content_base64.trim())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))
}

fn xlsx_response(file_name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn read_file(path: &FsPath) -> Result<Vec<u8>, AppError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| internal(format!("Failed to read {}: {}", path.display(), e)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionView {
    session_id: String,
    document_name: Option<String>,
    stage: Stage,
    stage_label: &'static str,
    has_summary: bool,
    has_test_points: bool,
    has_test_cases: bool,
    completeness: Option<CompletenessReport>,
    export_path: Option<String>,
    record_id: Option<i64>,
    created_at: String,
    last_activity: String,
}

impl From<&PipelineSession> for SessionView {
    fn from(s: &PipelineSession) -> Self {
        Self {
            session_id: s.id.clone(),
            document_name: s.document_name.clone(),
            stage: s.stage,
            stage_label: s.stage.label(),
            has_summary: !s.summary.trim().is_empty(),
            has_test_points: !s.test_points.trim().is_empty(),
            has_test_cases: !s.test_cases.trim().is_empty(),
            completeness: s.completeness.clone(),
            export_path: s.export_path.clone(),
            record_id: s.record_id,
            created_at: s.created_at.to_rfc3339(),
            last_activity: s.last_activity.to_rfc3339(),
        }
    }
}

async fn load_session(state: &AppState, id: &str) -> Result<PipelineSession, AppError> {
    state
        .sessions
        .get(id)
        .await?
        .ok_or_else(|| not_found(format!("session not found: {}", id)))
}

async fn store_session(state: &AppState, mut session: PipelineSession) -> ApiResult<SessionView> {
    session.touch(Utc::now());
    let view = SessionView::from(&session);
    state.sessions.put(session).await?;
    Ok(Json(view))
}

fn new_session() -> PipelineSession {
    PipelineSession::new(Uuid::new_v4().to_string(), Utc::now())
}

async fn handle_create_session(State(state): State<AppState>) -> ApiResult<SessionView> {
    store_session(&state, new_session()).await
}

async fn handle_list_sessions(State(state): State<AppState>) -> ApiResult<Vec<SessionView>> {
    state.sweep().await?;
    let sessions = state.sessions.list().await?;
    Ok(Json(sessions.iter().map(SessionView::from).collect()))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionView> {
    let session = load_session(&state, &id).await?;
    Ok(Json(SessionView::from(&session)))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    if !state.sessions.delete(&id).await? {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn handle_session_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PipelineSession> {
    Ok(Json(load_session(&state, &id).await?))
}

async fn handle_reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionView> {
    let mut session = load_session(&state, &id).await?;
    session.reset();
    store_session(&state, session).await
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
    session_id: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    document_name: String,
    characters: usize,
    stage: Stage,
}

async fn handle_upload_document(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<UploadResponse> {
    let name = clean_filename(&req.filename).ok_or_else(|| bad_request("filename must not be empty"))?;
    let extractors = state.kb.extractors();
    if !extractors.supports(FsPath::new(&name)) {
        return Err(bad_request(format!(
            "unsupported file type: {} (supported: {})",
            name,
            extractors.tags().join(", ")
        )));
    }
    let bytes = decode_upload(&req.content_base64)?;

    let mut session = match &req.session_id {
        Some(id) => load_session(&state, id).await?,
        None => new_session(),
    };

    let dest = state
        .config
        .uploads_dir()
        .join(format!("{}_{}", &Uuid::new_v4().simple().to_string()[..8], name));
    tokio::fs::create_dir_all(state.config.uploads_dir())
        .await
        .map_err(|e| internal(format!("Failed to create upload directory: {}", e)))?;
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| internal(format!("Failed to save upload: {}", e)))?;

    let kb = state.kb.clone();
    let path = dest.clone();
    let text = tokio::task::spawn_blocking(move || kb.extractors().extract_text(&path))
        .await
        .map_err(|e| internal(format!("Extraction task failed: {}", e)))?
        .map_err(|e| bad_request(format!("Failed to read {}: {}", name, e)))?;
    if text.trim().is_empty() {
        return Err(bad_request(format!("no text could be extracted from {}", name)));
    }

    let characters = text.chars().count();
    session.load_document(&name, Some(dest.display().to_string()), text);
    info!(session = %session.id, document = %name, characters, "document loaded");

    let response = UploadResponse {
        session_id: session.id.clone(),
        document_name: name,
        characters,
        stage: session.stage,
    };
    state.sessions.put(session).await?;
    Ok(Json(response))
}

// ============ POST /generate ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct RunBody {
    prompt: Option<String>,
    validate: Option<bool>,
    use_knowledge: Option<bool>,
}

impl RunBody {
    fn options(self) -> RunOptions {
        RunOptions {
            validate: self.validate.unwrap_or(true),
            prompt: self.prompt,
            use_knowledge: self.use_knowledge.unwrap_or(true),
        }
    }
}

#[derive(Deserialize)]
struct GenerateRequest {
    session_id: Option<String>,
    stage: String,
    document_text: Option<String>,
    previous_stage_result: Option<String>,
    #[serde(flatten)]
    run: RunBody,
}

#[derive(Serialize)]
struct GenerateResponse {
    session_id: String,
    stage: Stage,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    next_stage: Option<Stage>,
    timestamp: String,
}

/// Run `stage` and store the session whatever the outcome. Gating errors
/// become HTTP errors; generation failures become `status: error`.
async fn run_and_store(
    state: &AppState,
    mut session: PipelineSession,
    stage: Stage,
    opts: RunOptions,
) -> ApiResult<GenerateResponse> {
    let result = state.generator.run_stage(&mut session, stage, &opts).await;
    let session_id = session.id.clone();
    session.touch(Utc::now());
    state.sessions.put(session).await?;

    let timestamp = Utc::now().to_rfc3339();
    match result {
        Ok(report) => Ok(Json(GenerateResponse {
            session_id,
            stage,
            status: "success",
            next_stage: report.next_stage,
            result: Some(report),
            error: None,
            timestamp,
        })),
        Err(e) => {
            if let Some(stage_err) = e.downcast_ref::<StageError>() {
                return Err(stage_err.clone().into());
            }
            warn!(session = %session_id, stage = %stage, error = %format!("{:#}", e), "stage failed");
            Ok(Json(GenerateResponse {
                session_id,
                stage,
                status: "error",
                result: None,
                error: Some(format!("{:#}", e)),
                next_stage: None,
                timestamp,
            }))
        }
    }
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    let stage = parse_stage(&req.stage)?;
    let mut session = match &req.session_id {
        Some(id) => load_session(&state, id).await?,
        None => new_session(),
    };
    if let Some(text) = req.document_text.filter(|t| !t.trim().is_empty()) {
        session.load_document("document.txt", None, text);
    }
    if let Some(text) = req.previous_stage_result.filter(|t| !t.trim().is_empty()) {
        if let Some(previous) = stage.previous().filter(|p| p.is_generative()) {
            session.seed_output(previous, text)?;
        }
    }
    run_and_store(&state, session, stage, req.run.options()).await
}

// ============ Stage edit / regenerate / back ============

#[derive(Deserialize)]
struct EditRequest {
    text: Option<String>,
    #[serde(default = "default_true")]
    confirm: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_edit_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    Json(req): Json<EditRequest>,
) -> ApiResult<SessionView> {
    let stage = parse_stage(&stage)?;
    let mut session = load_session(&state, &id).await?;
    if req.confirm {
        session.confirm(stage, req.text)?;
    } else {
        let text = req.text.ok_or_else(|| bad_request("text is required when not confirming"))?;
        session.set_output(stage, text)?;
    }
    store_session(&state, session).await
}

async fn handle_regenerate(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    body: Option<Json<RunBody>>,
) -> ApiResult<GenerateResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let stage = parse_stage(&stage)?;
    let mut session = load_session(&state, &id).await?;
    session.regenerate(stage)?;
    run_and_store(&state, session, stage, body.options()).await
}

#[derive(Deserialize)]
struct BackRequest {
    stage: String,
}

async fn handle_back(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BackRequest>,
) -> ApiResult<SessionView> {
    let stage = parse_stage(&req.stage)?;
    let mut session = load_session(&state, &id).await?;
    session.go_back(stage)?;
    store_session(&state, session).await
}

// ============ Export ============

async fn handle_export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let mut session = load_session(&state, &id).await?;
    let report = state.generator.export(&mut session).await?;
    save_record(&state.records, &mut session).await?;
    state.sessions.put(session).await?;

    let export = report
        .export
        .ok_or_else(|| internal("export produced no file"))?;
    let bytes = read_file(&export.path).await?;
    Ok(xlsx_response(&export.file_name, bytes))
}

// ============ Records ============

async fn handle_list_records(State(state): State<AppState>) -> ApiResult<Vec<crate::records::Record>> {
    Ok(Json(state.records.list_records().await?))
}

async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<crate::records::Record> {
    let record = state
        .records
        .get_record(id)
        .await?
        .ok_or_else(|| not_found(format!("record not found: {}", id)))?;
    Ok(Json(record))
}

async fn handle_delete_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    if !state.records.delete_record(id).await? {
        return Err(not_found(format!("record not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn handle_export_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let record = state
        .records
        .get_record(id)
        .await?
        .ok_or_else(|| not_found(format!("record not found: {}", id)))?;
    let path = export_record(&state.records, &state.config, &record).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test_cases.xlsx".to_string());
    let bytes = read_file(&path).await?;
    Ok(xlsx_response(&file_name, bytes))
}

// ============ Knowledge base ============

#[derive(Deserialize)]
struct KnowledgeUpload {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct KnowledgeUploadResponse {
    id: i64,
    filename: String,
    chunks: usize,
}

async fn handle_upload_knowledge(
    State(state): State<AppState>,
    Json(req): Json<KnowledgeUpload>,
) -> ApiResult<KnowledgeUploadResponse> {
    let name = clean_filename(&req.filename).ok_or_else(|| bad_request("filename must not be empty"))?;
    let extractors = state.kb.extractors();
    if !extractors.supports(FsPath::new(&name)) {
        return Err(bad_request(format!(
            "unsupported file type: {} (supported: {})",
            name,
            extractors.tags().join(", ")
        )));
    }
    let bytes = decode_upload(&req.content_base64)?;

    let dest: PathBuf = state.kb.files_dir().join(&name);
    tokio::fs::create_dir_all(state.kb.files_dir())
        .await
        .map_err(|e| internal(format!("Failed to create knowledge directory: {}", e)))?;
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| internal(format!("Failed to save {}: {}", name, e)))?;

    let dest_str = dest.display().to_string();
    let id = state.records.add_knowledge_file(&name, &dest_str).await?;
    state.records.refresh_knowledge_hash(&dest_str).await?;

    let report = state.kb.add_file(&dest).await.map_err(|e| {
        warn!(file = %name, error = %format!("{:#}", e), "knowledge file ingestion failed");
        error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ingestion_failed",
            format!("{:#}", e),
        )
    })?;

    Ok(Json(KnowledgeUploadResponse {
        id,
        filename: name,
        chunks: report.chunks,
    }))
}

async fn handle_list_knowledge(
    State(state): State<AppState>,
) -> ApiResult<Vec<crate::records::KnowledgeFile>> {
    Ok(Json(state.records.list_knowledge_files().await?))
}

async fn handle_delete_knowledge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    let file = state
        .records
        .delete_knowledge_file(id)
        .await?
        .ok_or_else(|| not_found(format!("knowledge file not found: {}", id)))?;
    Ok(Json(serde_json::json!({
        "deleted": file,
        "rebuild_required": true,
    })))
}

async fn handle_rebuild(State(state): State<AppState>) -> ApiResult<crate::knowledge::RebuildReport> {
    Ok(Json(state.kb.rebuild_index().await?))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: KnowledgeStatus,
    file_records: i64,
    drift: bool,
}

async fn handle_knowledge_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let status = state.kb.get_index_status().await?;
    let file_records = state.records.knowledge_file_count().await?;
    Ok(Json(StatusResponse {
        drift: status.drifts_from_records(file_records),
        status,
        file_records,
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    k: Option<usize>,
    min_similarity: Option<f64>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<KnowledgeHit>,
}

async fn handle_knowledge_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = params
        .k
        .unwrap_or(state.config.retrieval.default_k)
        .min(state.config.retrieval.max_candidates);
    let min_similarity = params
        .min_similarity
        .unwrap_or(state.config.retrieval.min_similarity);
    if !(0.0..=100.0).contains(&min_similarity) {
        return Err(bad_request("min_similarity must be between 0 and 100"));
    }
    let results = state.kb.search(&params.query, k, Some(min_similarity)).await?;
    Ok(Json(SearchResponse {
        query: params.query,
        results,
    }))
}

// ============ Q&A ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    contexts: Option<Vec<String>>,
    reference_count: Option<usize>,
}

async fn handle_ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> ApiResult<qa::Answer> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let answer = qa::ask(
        &state.kb,
        state.generator.llm().as_ref(),
        &state.records,
        &req.question,
        req.contexts,
        req.reference_count
            .unwrap_or(state.config.retrieval.default_k)
            .min(state.config.retrieval.max_candidates),
    )
    .await?;
    Ok(Json(answer))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn handle_qa_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<crate::records::QaRecord>> {
    Ok(Json(state.records.list_qa(params.limit.unwrap_or(50)).await?))
}

async fn handle_delete_qa(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    if !state.records.delete_qa(id).await? {
        return Err(not_found(format!("q&a record not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
struct VoteBody {
    vote: Vote,
    voter: Option<String>,
}

#[derive(Serialize)]
struct VoteResponse {
    id: i64,
    outcome: VoteOutcome,
    upvotes: i64,
    downvotes: i64,
}

async fn handle_vote_qa(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<VoteBody>,
) -> ApiResult<VoteResponse> {
    let voter = body
        .voter
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    let outcome = state
        .records
        .vote_qa(id, &voter, body.vote)
        .await?
        .ok_or_else(|| not_found(format!("q&a record not found: {}", id)))?;
    let record = state
        .records
        .get_qa(id)
        .await?
        .ok_or_else(|| not_found(format!("q&a record not found: {}", id)))?;
    Ok(Json(VoteResponse {
        id,
        outcome,
        upvotes: record.upvotes,
        downvotes: record.downvotes,
    }))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| bad_request(format!("{} must be YYYY-MM-DD, got {:?}", field, value)))
}

#[derive(Deserialize)]
struct StatsParams {
    date: Option<String>,
}

async fn handle_qa_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<QaDailyStats> {
    let date = match params.date.as_deref() {
        Some(d) => parse_date("date", d)?,
        None => Utc::now().date_naive(),
    };
    Ok(Json(state.records.qa_daily_stats(date).await?))
}

#[derive(Deserialize)]
struct QuestionsParams {
    days: Option<u32>,
}

async fn handle_qa_questions(
    State(state): State<AppState>,
    Query(params): Query<QuestionsParams>,
) -> ApiResult<QuestionFrequency> {
    let days = params.days.unwrap_or(7);
    Ok(Json(
        state
            .records
            .question_frequency(Utc::now().date_naive(), days)
            .await?,
    ))
}

// ============ Feedback ============

async fn handle_add_feedback(
    State(state): State<AppState>,
    Json(feedback): Json<NewFeedback>,
) -> ApiResult<serde_json::Value> {
    if feedback.generator_name.trim().is_empty() {
        return Err(bad_request("generator_name must not be empty"));
    }
    if !(0.0..=100.0).contains(&feedback.adoption_rate) {
        return Err(bad_request("adoption_rate must be between 0 and 100"));
    }
    let id = state.records.add_feedback(&feedback).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn handle_list_feedback(
    State(state): State<AppState>,
) -> ApiResult<Vec<crate::records::Feedback>> {
    Ok(Json(state.records.list_feedback().await?))
}

#[derive(Deserialize)]
struct FeedbackExportParams {
    start_date: String,
    end_date: String,
}

async fn handle_export_feedback(
    State(state): State<AppState>,
    Query(params): Query<FeedbackExportParams>,
) -> Result<Response, AppError> {
    let start = parse_date("start_date", &params.start_date)?;
    let end = parse_date("end_date", &params.end_date)?;
    if start > end {
        return Err(bad_request("start_date must not be after end_date"));
    }

    let feedback = state.records.feedback_between(start, end).await?;
    if feedback.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    info!(rows = feedback.len(), %start, %end, "Exporting feedback");
    let bytes = tokio::task::spawn_blocking(move || render_feedback(&feedback))
        .await
        .map_err(|e| internal(format!("spreadsheet writer panicked: {}", e)))??;
    Ok(xlsx_response(&feedback_file_name(start, end), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_filename_strips_directories() {
        assert_eq!(clean_filename("../../etc/passwd.txt").as_deref(), Some("passwd.txt"));
        assert_eq!(clean_filename("spec.docx").as_deref(), Some("spec.docx"));
        assert_eq!(clean_filename("  "), None);
        assert_eq!(clean_filename(".."), None);
    }

    #[test]
    fn test_stage_errors_map_to_status() {
        let gating: AppError = StageError::NoDocument.into();
        assert_eq!(gating.status, StatusCode::CONFLICT);
        let unknown: AppError = StageError::UnknownStage("x".into()).into();
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
        let wrapped: AppError = anyhow::Error::from(StageError::EmptyOutput(Stage::TestPointDesign))
            .context("confirm failed")
            .into();
        assert_eq!(wrapped.code, "conflict");
        let other: AppError = anyhow::anyhow!("disk full").into();
        assert_eq!(other.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
