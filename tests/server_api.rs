//! HTTP API tests: the router runs on an ephemeral port with a scripted LLM.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tempfile::TempDir;

use casegen::config::Config;
use casegen::llm::{ChatMessage, LlmClient};
use casegen::server::{router, AppState};

struct ScriptedLlm {
    fail: bool,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        if self.fail {
            bail!("LLM connection error (http://127.0.0.1:9/v1/chat/completions): refused");
        }
        let system = &messages[0].content;
        let reply = if system.contains("test analyst") {
            "# Document overview\n## Summary\nLogin needs username and password."
        } else if system.contains("test architect") {
            "| ID | Test point | Technique |\n|---|---|---|\n| TP-001 | Empty username | Equivalence class |"
        } else if system.contains("test engineer") {
            "| Case ID | Title | Steps | Expected Result |\n|---|---|---|---|\n| LOGIN_001 | Empty username | 1. Submit | Error shown |"
        } else if system.contains("knowledge assistant") {
            "Passwords need at least 8 chars."
        } else {
            "No gaps found."
        };
        Ok(reply.to_string())
    }
}

struct TestServer {
    _tmp: TempDir,
    config: Config,
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(fail: bool) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_data_dir(tmp.path().join("data"));
        let state = AppState::build(&config, Arc::new(ScriptedLlm { fail }))
            .await
            .unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        Self {
            _tmp: tmp,
            config,
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(reqwest::Method::POST, path, body).await
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let resp = self.client.delete(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn upload_document(&self, name: &str, text: &str) -> String {
        let (status, body) = self
            .post(
                "/documents",
                json!({"filename": name, "content_base64": STANDARD.encode(text)}),
            )
            .await;
        assert_eq!(status, 200, "upload failed: {}", body);
        body["session_id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start(false).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn test_stage_flow_with_gating_and_export() {
    let server = TestServer::start(false).await;
    let id = server
        .upload_document("login.txt", "User login requires username and password")
        .await;

    let (status, body) = server
        .post("/generate", json!({"session_id": id, "stage": "test_case_synthesis"}))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = server
        .post("/generate", json!({"session_id": id, "stage": "document_analysis"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["next_stage"], "test_point_design");
    assert!(body["result"]["output"].as_str().unwrap().contains("Login"));
    assert!(body["result"]["quality"]["overall_score"].is_number());

    let (status, body) = server
        .send(
            reqwest::Method::PUT,
            &format!("/sessions/{}/stages/document_analysis", id),
            json!({"text": "## Summary\nLogin with username and password (edited)"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["stage"], "test_point_design");

    for stage in ["test_point_design", "test_case_synthesis"] {
        let (status, body) = server
            .post("/generate", json!({"session_id": id, "stage": stage}))
            .await;
        assert_eq!(status, 200, "{}: {}", stage, body);
        assert_eq!(body["status"], "success");
    }

    let (_, data) = server.get(&format!("/sessions/{}/data", id)).await;
    assert!(data["summary"].as_str().unwrap().contains("(edited)"));
    assert_eq!(data["completeness"]["covered"], 1);

    let resp = server
        .client
        .get(server.url(&format!("/sessions/{}/export", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("login_test_cases_"));
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..2], b"PK");

    server
        .client
        .get(server.url(&format!("/sessions/{}/export", id)))
        .send()
        .await
        .unwrap();
    let (_, records) = server.get("/records").await;
    assert_eq!(records.as_array().unwrap().len(), 1);
    let record_id = records[0]["id"].as_i64().unwrap();

    let resp = server
        .client
        .get(server.url(&format!("/records/{}/export", record_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let (status, _) = server.delete(&format!("/records/{}", record_id)).await;
    assert_eq!(status, 200);
    let (status, _) = server.get(&format!("/records/{}", record_id)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_back_and_reset() {
    let server = TestServer::start(false).await;
    let id = server.upload_document("requirements.md", "# Login\nUsername and password").await;
    server
        .post("/generate", json!({"session_id": id, "stage": "analysis"}))
        .await;

    let (status, body) = server
        .post(&format!("/sessions/{}/back", id), json!({"stage": "test_case_synthesis"}))
        .await;
    assert_eq!(status, 409, "{}", body);

    let (status, body) = server.delete(&format!("/sessions/{}/data", id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["stage"], "not_started");
    assert_eq!(body["document_name"], Value::Null);
}

#[tokio::test]
async fn test_generate_errors() {
    let server = TestServer::start(false).await;

    let (status, body) = server
        .post("/generate", json!({"stage": "brainstorm", "document_text": "x"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = server
        .post("/generate", json!({"session_id": "missing", "stage": "analysis"}))
        .await;
    assert_eq!(status, 404);

    let (status, body) = server
        .post(
            "/documents",
            json!({"filename": "diagram.png", "content_base64": STANDARD.encode("x")}),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("unsupported"));
}

#[tokio::test]
async fn test_llm_failure_is_reported_in_body() {
    let server = TestServer::start(true).await;
    let (status, body) = server
        .post(
            "/generate",
            json!({"stage": "document_analysis", "document_text": "User login requires a password"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("Document analysis failed"));

    let id = body["session_id"].as_str().unwrap();
    let (_, data) = server.get(&format!("/sessions/{}/data", id)).await;
    assert_eq!(data["summary"], "");
    assert!(data["document_text"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn test_generate_later_stages_from_previous_result() {
    let server = TestServer::start(false).await;

    let (status, body) = server
        .post(
            "/generate",
            json!({
                "stage": "test_point_design",
                "previous_stage_result": "## Summary\nLogin needs username and password.",
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["status"], "success");
    assert!(body["result"]["output"].as_str().unwrap().contains("TP-001"));

    let (status, body) = server
        .post(
            "/generate",
            json!({
                "stage": "test_case_synthesis",
                "previous_stage_result": "| ID | Test point |\n|---|---|\n| TP-001 | Empty username |",
                "validate": false,
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["result"]["completeness"]["covered"], 1);
    assert!(body["result"]["output"].as_str().unwrap().contains("LOGIN_001"));
}

#[tokio::test]
async fn test_knowledge_lifecycle() {
    let server = TestServer::start(false).await;

    let (status, body) = server
        .post(
            "/knowledge/files",
            json!({
                "filename": "rules.csv",
                "content_base64": STANDARD.encode("feature,rule\nlogin,password >= 8 chars\n"),
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["chunks"], 1);
    let file_id = body["id"].as_i64().unwrap();

    let (status, body) = server
        .get("/knowledge/search?query=password%20length%20rule&k=3&min_similarity=50")
        .await;
    assert_eq!(status, 200);
    assert!(body["results"][0]["content"].as_str().unwrap().contains("8 chars"));

    let (_, status_body) = server.get("/knowledge/status").await;
    assert_eq!(status_body["drift"], false);
    assert_eq!(status_body["file_records"], 1);

    let (status, body) = server.delete(&format!("/knowledge/files/{}", file_id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["rebuild_required"], true);

    let (_, status_body) = server.get("/knowledge/status").await;
    assert_eq!(status_body["drift"], true);

    let (status, _) = server.post("/knowledge/rebuild", json!({})).await;
    assert_eq!(status, 200);
    let (_, status_body) = server.get("/knowledge/status").await;
    assert_eq!(status_body["drift"], false);
    assert_eq!(status_body["document_count"], 0);

    let (status, _) = server.get("/knowledge/search?query=%20").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_knowledge_search_with_huge_k() {
    let server = TestServer::start(false).await;
    server
        .post(
            "/knowledge/files",
            json!({
                "filename": "rules.csv",
                "content_base64": STANDARD.encode("feature,rule\nlogin,password >= 8 chars\n"),
            }),
        )
        .await;

    let (status, body) = server
        .get("/knowledge/search?query=password%20rule&k=18446744073709551615")
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let (status, body) = server
        .post(
            "/qa/ask",
            json!({"question": "password rule?", "reference_count": 18446744073709551615u64}),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
}

#[tokio::test]
async fn test_untracked_knowledge_file_is_drift() {
    let server = TestServer::start(false).await;
    let files_dir = server.config.knowledge_files_dir();
    std::fs::create_dir_all(&files_dir).unwrap();
    std::fs::write(files_dir.join("manual.txt"), "Dropped in by hand").unwrap();

    let (status, _) = server.post("/knowledge/rebuild", json!({})).await;
    assert_eq!(status, 200);
    let (_, body) = server.get("/knowledge/status").await;
    assert_eq!(body["unindexed_files"].as_array().unwrap().len(), 0);
    assert_eq!(body["orphaned_sources"].as_array().unwrap().len(), 0);
    assert_eq!(body["file_count"], 1);
    assert_eq!(body["file_records"], 0);
    assert_eq!(body["drift"], true);
}

#[tokio::test]
async fn test_qa_and_feedback() {
    let server = TestServer::start(false).await;

    let (status, body) = server
        .post(
            "/qa/ask",
            json!({"question": "How long must a password be?", "contexts": ["password >= 8 chars"]}),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert!(body["answer"].as_str().unwrap().contains("8 chars"));

    let (_, history) = server.get("/qa/history").await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    let qa_id = history[0]["id"].as_i64().unwrap();
    let (status, _) = server.delete(&format!("/qa/history/{}", qa_id)).await;
    assert_eq!(status, 200);
    let (status, _) = server.delete(&format!("/qa/history/{}", qa_id)).await;
    assert_eq!(status, 404);

    let (status, _) = server
        .post(
            "/feedback",
            json!({"generator_name": "alice", "adoption_rate": 80.0, "time_saved_hours": 2.5}),
        )
        .await;
    assert_eq!(status, 200);
    let (status, _) = server
        .post(
            "/feedback",
            json!({"generator_name": "bob", "adoption_rate": 180.0, "time_saved_hours": 1.0}),
        )
        .await;
    assert_eq!(status, 400);
    let (_, feedback) = server.get("/feedback").await;
    assert_eq!(feedback.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_qa_votes_one_per_voter() {
    let server = TestServer::start(false).await;
    server
        .post("/qa/ask", json!({"question": "Password length?", "contexts": ["8 chars"]}))
        .await;
    let (_, history) = server.get("/qa/history").await;
    let qa_id = history[0]["id"].as_i64().unwrap();
    let path = format!("/qa/history/{}/feedback", qa_id);

    let (status, body) = server.post(&path, json!({"vote": "upvote", "voter": "alice"})).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["outcome"], "recorded");
    assert_eq!(body["upvotes"], 1);

    let (_, body) = server.post(&path, json!({"vote": "upvote", "voter": "alice"})).await;
    assert_eq!(body["outcome"], "unchanged");
    assert_eq!(body["upvotes"], 1);

    let (_, body) = server.post(&path, json!({"vote": "downvote", "voter": "alice"})).await;
    assert_eq!(body["outcome"], "changed");
    assert_eq!((body["upvotes"].as_i64(), body["downvotes"].as_i64()), (Some(0), Some(1)));

    let (_, body) = server.post(&path, json!({"vote": "upvote"})).await;
    assert_eq!(body["outcome"], "recorded");
    assert_eq!(body["upvotes"], 1);

    let (status, _) = server.post(&path, json!({"vote": "meh"})).await;
    assert!(status == 400 || status == 422);
    let (status, body) = server
        .post(&format!("/qa/history/{}/feedback", qa_id + 1000), json!({"vote": "upvote"}))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (_, history) = server.get("/qa/history").await;
    assert_eq!(history[0]["upvotes"], 1);
    assert_eq!(history[0]["downvotes"], 1);

    let (status, stats) = server.get("/qa/stats").await;
    assert_eq!(status, 200);
    assert_eq!(stats["total_qa"], 1);
    assert_eq!(stats["feedback_rate"], 2.0);
    let (status, _) = server.get("/qa/stats?date=yesterday").await;
    assert_eq!(status, 400);

    let (status, freq) = server.get("/qa/questions?days=7").await;
    assert_eq!(status, 200);
    assert_eq!(freq["total_unique_questions"], 1);
    assert_eq!(freq["most_frequent"][0]["question"], "Password length?");
}

#[tokio::test]
async fn test_feedback_export() {
    use calamine::Reader;

    let server = TestServer::start(false).await;
    let today = chrono::Utc::now().date_naive();
    let range = format!(
        "/feedback/export?start_date={}&end_date={}",
        today.format("%Y-%m-%d"),
        today.format("%Y-%m-%d")
    );

    let resp = server.client.get(server.url(&range)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);

    server
        .post(
            "/feedback",
            json!({"generator_name": "alice", "adoption_rate": 80.0, "time_saved_hours": 2.5,
                   "problem_feedback": "too few boundary cases"}),
        )
        .await;

    let resp = server.client.get(server.url(&range)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains(&format!("feedback_{}", today.format("%Y-%m-%d"))));
    let bytes = resp.bytes().await.unwrap().to_vec();
    let mut workbook: calamine::Xlsx<_> =
        calamine::open_workbook_from_rs(std::io::Cursor::new(bytes)).unwrap();
    let range = workbook.worksheet_range("Feedback").unwrap();
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][2], "alice");
    assert_eq!(rows[1][5], "too few boundary cases");

    let (status, _) = server
        .get("/feedback/export?start_date=2026-03-10&end_date=2026-03-01")
        .await;
    assert_eq!(status, 400);
    let (status, _) = server
        .get("/feedback/export?start_date=03/01/2026&end_date=2026-03-10")
        .await;
    assert_eq!(status, 400);
}
