//! CLI tests: drive the `chx` binary against a temporary repository and
//! store.

mod common;

use std::fs;
use std::path::Path;
use std::process::Command;

use axum::http::StatusCode;

fn run_chx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_chx"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run chx");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

const NO_LLM: &str = "http://127.0.0.1:9/api/generate";

#[test]
fn test_init() {
    let env = common::setup(NO_LLM);
    let (stdout, stderr, success) = run_chx(&env.config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Store initialized"));
    assert!(env.tmp.path().join("store/commits.sqlite").exists());

    let (_, stderr, success) = run_chx(&env.config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_then_reingest() {
    let env = common::setup(NO_LLM);

    let (stdout, stderr, success) = run_chx(&env.config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("extracted: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("written: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("failed: 0"));
    assert!(stdout.trim_end().ends_with("ok"));

    let (stdout, _, success) = run_chx(&env.config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("written: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped (unchanged): 3"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let env = common::setup(NO_LLM);

    let (stdout, stderr, success) = run_chx(&env.config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains(&format!("commit_0_{}", env.shas[2])));
    assert!(stdout.contains(&format!("commit_2_{}", env.shas[0])));
    assert!(stdout.contains("1970-01-01 00:16:40  Bo  fix bug"));
    assert!(!env.tmp.path().join("store/commits.sqlite").exists());
}

#[test]
fn test_ingest_max_count_override() {
    let env = common::setup(NO_LLM);
    let (stdout, stderr, success) = run_chx(&env.config_path, &["ingest", "--max-count", "2"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("extracted: 2"));
}

#[test]
fn test_ingest_unknown_branch_fails() {
    let env = common::setup(NO_LLM);
    let (stdout, stderr, success) =
        run_chx(&env.config_path, &["ingest", "--branch", "release-9"]);
    assert!(!success);
    assert!(stderr.contains("release-9"), "stderr: {}", stderr);
    assert!(!stdout.contains("written"));
}

#[test]
fn test_ingest_not_a_repository_fails() {
    let env = common::setup(NO_LLM);
    let elsewhere = env.tmp.path().join("not-a-repo");
    fs::create_dir_all(&elsewhere).unwrap();
    let (_, stderr, success) = run_chx(
        &env.config_path,
        &["ingest", "--repo", elsewhere.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("Not a git repository"), "stderr: {}", stderr);
}

#[test]
fn test_search_json() {
    let env = common::setup(NO_LLM);
    let (_, stderr, success) = run_chx(&env.config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);

    let (stdout, stderr, success) = run_chx(
        &env.config_path,
        &["search", "refactor", "--limit", "1", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["document"].as_str().unwrap().trim(), "refactor");
    assert_eq!(hits[0]["metadata"]["author"], "Jo");
    assert_eq!(hits[0]["metadata"]["hexsha"], env.shas[2].as_str());
    assert_eq!(hits[0]["id"], format!("commit_0_{}", env.shas[2]).as_str());
}

#[test]
fn test_search_text_output() {
    let env = common::setup(NO_LLM);
    run_chx(&env.config_path, &["ingest"]);

    let (stdout, _, success) = run_chx(&env.config_path, &["search", "add feature"]);
    assert!(success);
    assert!(stdout.starts_with("1. [0.0000] add feature"), "stdout: {}", stdout);
    assert!(stdout.contains("    author: Bo"));
    assert!(stdout.contains("2. ["));
}

#[test]
fn test_search_empty_store() {
    let env = common::setup(NO_LLM);
    let (stdout, _, success) = run_chx(&env.config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats() {
    let env = common::setup(NO_LLM);
    run_chx(&env.config_path, &["ingest"]);

    let (stdout, stderr, success) = run_chx(&env.config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Entries:     3"), "stdout: {}", stdout);
    assert!(stdout.contains("git_commits"));
    assert!(stdout.contains("1970-01-01 00:16:40"));
    assert!(stdout.contains("1970-01-01 00:16:42"));
}

#[test]
fn test_ingest_logs_then_search() {
    let env = common::setup(NO_LLM);

    let (stdout, stderr, success) = run_chx(&env.config_path, &["ingest-logs"]);
    assert!(success, "ingest-logs failed: {}", stderr);
    assert!(stdout.contains("collection: jenkins_logs"), "stdout: {}", stdout);
    assert!(stdout.contains("extracted: 4"), "stdout: {}", stdout);
    assert!(stdout.contains("written: 4"));
    assert!(stdout.trim_end().ends_with("ok"));

    let (stdout, stderr, success) = run_chx(
        &env.config_path,
        &["search", "--corpus", "logs", "error: linker cc not found", "--limit", "1", "--json"],
    );
    assert!(success, "search failed: {}", stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits[0]["id"], "log_chunk_2");
    assert_eq!(hits[0]["metadata"]["kind"], "log_chunk");
    assert_eq!(hits[0]["metadata"]["stage"], "Build");
    assert!(hits[0]["metadata"]["source"].as_str().unwrap().ends_with("build-1.txt"));

    // The commit collection is untouched.
    let (stdout, _, success) = run_chx(&env.config_path, &["search", "linker"]);
    assert!(success);
    assert!(stdout.contains("No results."), "stdout: {}", stdout);
}

#[test]
fn test_ingest_logs_dry_run() {
    let env = common::setup(NO_LLM);
    let (stdout, stderr, success) = run_chx(&env.config_path, &["ingest-logs", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("chunks found: 4"), "stdout: {}", stdout);
    assert!(stdout.contains("log_chunk_0"));
    assert!(stdout.contains("log_chunk_3"));
    assert!(stdout.contains("  Test  "));
    assert!(!stdout.contains("README"));
    assert!(!env.tmp.path().join("store/commits.sqlite").exists());
}

#[test]
fn test_ingest_logs_missing_folder_fails() {
    let env = common::setup(NO_LLM);
    let missing = env.tmp.path().join("no-logs");
    let (_, stderr, success) = run_chx(
        &env.config_path,
        &["ingest-logs", "--dir", missing.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_model_rejected_before_work() {
    let env = common::setup(NO_LLM);
    let content = fs::read_to_string(&env.config_path)
        .unwrap()
        .replace("model_name = \"model_a\"", "model_name = \"model_z\"");
    fs::write(&env.config_path, content).unwrap();

    let (_, stderr, success) = run_chx(&env.config_path, &["ask", "anything"]);
    assert!(!success);
    assert!(stderr.contains("model_z"), "stderr: {}", stderr);
    assert!(!env.tmp.path().join("store").exists());
}

#[test]
fn test_missing_config() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (_, stderr, success) = run_chx(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_completions() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (stdout, _, success) = run_chx(&tmp.path().join("unused.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("chx"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_configured_questions() {
    let (url, seen) = common::mock_ollama(
        StatusCode::OK,
        serde_json::json!({ "response": "Bo fixed it." }),
    )
    .await;
    let env = common::setup(&url);
    let config_path = env.config_path.clone();

    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_chx(&config_path, &["ingest"]);
        run_chx(&config_path, &["ask"])
    })
    .await
    .unwrap();

    assert!(success, "ask failed: {}", stderr);
    let first = stdout.find("Q.: Who fixed the bug?").unwrap();
    let second = stdout.find("Q.: What was refactored?").unwrap();
    assert!(first < second, "questions not in label order: {}", stdout);
    assert_eq!(stdout.matches(">>ANS: Bo fixed it.").count(), 2);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_single_question_no_response_field() {
    let (url, _seen) = common::mock_ollama(StatusCode::OK, serde_json::json!({})).await;
    let env = common::setup(&url);
    let config_path = env.config_path.clone();

    let (stdout, _, success) = tokio::task::spawn_blocking(move || {
        run_chx(&config_path, &["ingest"]);
        run_chx(&config_path, &["ask", "who fixed the bug?"])
    })
    .await
    .unwrap();

    assert!(success);
    assert!(stdout.contains("Q.: who fixed the bug?"));
    assert!(stdout.contains(">>ANS: [No response]"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_continues_after_inference_error() {
    let (url, seen) = common::mock_ollama(
        StatusCode::SERVICE_UNAVAILABLE,
        serde_json::json!({ "error": "busy" }),
    )
    .await;
    let env = common::setup(&url);
    let config_path = env.config_path.clone();

    let (stdout, _, success) = tokio::task::spawn_blocking(move || {
        run_chx(&config_path, &["ingest"]);
        run_chx(&config_path, &["ask"])
    })
    .await
    .unwrap();

    assert!(!success);
    assert_eq!(stdout.matches(">>ERR:").count(), 2, "stdout: {}", stdout);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_logs_uses_log_questions_and_preamble() {
    let (url, seen) = common::mock_ollama(
        StatusCode::OK,
        serde_json::json!({ "response": "The linker is missing." }),
    )
    .await;
    let env = common::setup(&url);
    let config_path = env.config_path.clone();

    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_chx(&config_path, &["ingest-logs"]);
        run_chx(&config_path, &["ask", "--corpus", "logs"])
    })
    .await
    .unwrap();

    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Q.: Why did the build fail?"));
    assert!(stdout.contains(">>ANS: The linker is missing."));
    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let prompt = requests[0]["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("You are a world class expert at analyzing Jenkins CI logs."));
    assert!(prompt.contains("[Pipeline] stage:"));
}
