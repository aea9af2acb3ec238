use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn casegen_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("casegen");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("rules.csv"),
        "feature,rule\nlogin,password >= 8 chars\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("session.md"),
        "# Session policy\n\nSessions expire after 30 minutes of inactivity.",
    )
    .unwrap();
    fs::write(files_dir.join("diagram.png"), "not really an image").unwrap();
    fs::write(
        files_dir.join("login.txt"),
        "User login requires username and password.",
    )
    .unwrap();

    // Port 9 (discard) refuses connections, so LLM calls fail fast.
    let config_content = format!(
        r#"[paths]
data_dir = "{}/data"

[embedding]
provider = "hash"

[llm]
base_url = "http://127.0.0.1:9/v1"
timeout_secs = 5

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("casegen.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_casegen(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = casegen_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run casegen binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn file(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_data_dir() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_casegen(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    let data = tmp.path().join("data");
    assert!(data.join("casegen.sqlite").exists());
    assert!(data.join("knowledge_base/vector_index/index.json").exists());
    assert!(data.join("outputs").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_casegen(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_casegen(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_casegen(Path::new("/nonexistent/casegen.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_kb_add_and_search_spreadsheet_row() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let rules = file(&config_path, "rules.csv");
    let (stdout, stderr, success) = run_casegen(&config_path, &["kb", "add", &rules]);
    assert!(success, "kb add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("added: rules.csv (1 chunks)"));

    let (stdout, _, success) = run_casegen(
        &config_path,
        &["kb", "search", "password length rule", "--min-similarity", "50"],
    );
    assert!(success);
    assert!(stdout.contains("8 chars"), "search output: {}", stdout);
    assert!(stdout.contains("sheet: rules, row 2"));
}

#[test]
fn test_search_empty_knowledge_base() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let (stdout, _, success) = run_casegen(&config_path, &["kb", "search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_kb_add_reports_unsupported_without_aborting() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let md = file(&config_path, "session.md");
    let png = file(&config_path, "diagram.png");
    let (stdout, _, success) = run_casegen(&config_path, &["kb", "add", &png, &md]);
    assert!(success);
    assert!(stdout.contains("added: session.md"));
    assert!(stdout.contains("failed: diagram.png"));
    assert!(stdout.contains("1 added, 1 failed"));

    let (_, stderr, success) = run_casegen(&config_path, &["kb", "add", &png]);
    assert!(!success);
    assert!(stderr.contains("No files were added"));
}

#[test]
fn test_remove_requires_yes_and_drift_until_rebuild() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);
    run_casegen(
        &config_path,
        &["kb", "add", &file(&config_path, "session.md")],
    );

    let (stdout, _, _) = run_casegen(&config_path, &["kb", "files"]);
    assert!(stdout.contains("session.md"));

    let (_, stderr, success) = run_casegen(&config_path, &["kb", "remove", "1"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_casegen(&config_path, &["kb", "remove", "1", "--yes"]);
    assert!(success);
    assert!(stdout.contains("Removed session.md"));

    let (stdout, _, _) = run_casegen(&config_path, &["kb", "status"]);
    assert!(stdout.contains("orphaned in index: session.md"));
    assert!(stdout.contains("drift: yes"));

    let (_, _, success) = run_casegen(&config_path, &["kb", "rebuild"]);
    assert!(!success, "rebuild must require --yes");

    let (stdout, _, success) = run_casegen(&config_path, &["kb", "rebuild", "--yes"]);
    assert!(success);
    assert!(stdout.contains("chunks: 0"));

    let (stdout, _, _) = run_casegen(&config_path, &["kb", "status"]);
    assert!(stdout.contains("indexed chunks: 0"));
    assert!(stdout.contains("drift: no"));
}

#[test]
fn test_records_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let (stdout, _, success) = run_casegen(&config_path, &["records", "list"]);
    assert!(success);
    assert!(stdout.contains("No records."));

    let (_, stderr, success) = run_casegen(&config_path, &["records", "show", "42"]);
    assert!(!success);
    assert!(stderr.contains("Record not found: 42"));

    let (_, stderr, success) = run_casegen(&config_path, &["records", "delete", "42"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));
}

#[test]
fn test_generate_reports_unreachable_llm() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let login = file(&config_path, "login.txt");
    let (stdout, stderr, success) = run_casegen(&config_path, &["generate", &login]);
    assert!(!success, "generate should fail: stdout={}", stdout);
    assert!(stderr.contains("Document analysis failed"), "stderr: {}", stderr);

    let (stdout, _, _) = run_casegen(&config_path, &["records", "list"]);
    assert!(stdout.contains("No records."));
}

#[test]
fn test_generate_rejects_unsupported_document() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let png = file(&config_path, "diagram.png");
    let (_, stderr, success) = run_casegen(&config_path, &["generate", &png]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"));
}

#[test]
fn test_feedback_export_and_qa_stats_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    run_casegen(&config_path, &["init"]);

    let (stdout, stderr, success) = run_casegen(
        &config_path,
        &["feedback", "export", "--start", "2026-03-01", "--end", "2026-03-31"],
    );
    assert!(success, "feedback export failed: {}", stderr);
    assert!(stdout.contains("No feedback between 2026-03-01 and 2026-03-31."));

    let (_, stderr, success) = run_casegen(
        &config_path,
        &["feedback", "export", "--start", "2026-03-31", "--end", "2026-03-01"],
    );
    assert!(!success);
    assert!(stderr.contains("is after --end"));

    let (stdout, _, success) =
        run_casegen(&config_path, &["qa", "stats", "--date", "2026-03-10", "--days", "30"]);
    assert!(success);
    assert!(stdout.contains("Q&A on 2026-03-10"));
    assert!(stdout.contains("Top questions, last 30 days (0 unique)"));
}
