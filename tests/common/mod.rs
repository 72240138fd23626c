#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tempfile::TempDir;

pub fn git(dir: &Path, args: &[&str], envs: &[(&str, &str)]) -> String {
    let output = Command::new("git")
        .args(args)
        .envs(envs.iter().copied())
        .current_dir(dir)
        .output()
        .expect("git must be installed to run these tests");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit(dir: &Path, author: &str, message: &str, ts: i64) -> String {
    let date = format!("@{} +0000", ts);
    let name = format!("user.name={}", author);
    git(
        dir,
        &[
            "-c",
            &name,
            "-c",
            "user.email=dev@example.com",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--allow-empty",
            "-q",
            "-m",
            message,
        ],
        &[("GIT_AUTHOR_DATE", &date), ("GIT_COMMITTER_DATE", &date)],
    );
    git(dir, &["rev-parse", "HEAD"], &[])
}

pub const BUILD_LOG: &str = "Started by timer\n\
[Pipeline] stage: Checkout\n\
git fetch origin main\n\
[Pipeline] stage: Build\n\
cargo build --release\n\
error: linker cc not found\n";

pub const TEST_LOG: &str = "[Pipeline] stage: Test\n\
running 12 tests\n\
test result: ok\n";

/// Two Jenkins console logs under `dir`, plus a file that is not a log.
pub fn write_logs(dir: &Path) {
    fs::create_dir_all(dir.join("nightly")).unwrap();
    fs::write(dir.join("build-1.txt"), BUILD_LOG).unwrap();
    fs::write(dir.join("nightly/build-2.txt"), TEST_LOG).unwrap();
    fs::write(dir.join("README.md"), "not a log").unwrap();
}

/// A repository on `main` with three commits. Returns the hashes oldest first.
pub fn init_repo(dir: &Path) -> Vec<String> {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"], &[]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"], &[]);
    vec![
        commit(dir, "Bo", "fix bug", 1000),
        commit(dir, "Bo", "add feature", 1001),
        commit(dir, "Jo", "refactor", 1002),
    ]
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub repo: PathBuf,
    pub config_path: PathBuf,
    /// Commit hashes, oldest first.
    pub shas: Vec<String>,
}

pub fn config_toml(root: &Path, repo: &Path, ollama_url: &str) -> String {
    format!(
        r#"[store]
persist_dir = "{root}/store"
collection_name = "git_commits"

[repository]
git_repo_dir = "{repo}"
branch = "main"
no_of_commits = 10

[embedding]
provider = "hashing"
dims = 256
batch_size = 2

[llm]
ollama_url = "{ollama_url}"
model_name = "model_a"
timeout_secs = 5

[llm.context_limits]
model_a = 8000
model_b = 4000

[retrieval]
n_relevant_results = 2

[ingest]
workers = 2

[logs]
log_folder = "{root}/logs"
collection_name = "jenkins_logs"
no_of_threads = 2

[logs.questions]
a_failure = "Why did the build fail?"

[questions]
b_second = "What was refactored?"
a_first = "Who fixed the bug?"
"#,
        root = root.display(),
        repo = repo.display(),
        ollama_url = ollama_url,
    )
}

pub fn setup(ollama_url: &str) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let repo = root.join("repo");
    let shas = init_repo(&repo);
    write_logs(&root.join("logs"));

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("chx.toml");
    fs::write(&config_path, config_toml(&root, &repo, ollama_url)).unwrap();

    TestEnv {
        tmp,
        repo,
        config_path,
        shas,
    }
}

/// Requests received by the mock generate endpoint.
pub type Seen = Arc<Mutex<Vec<serde_json::Value>>>;

#[derive(Clone)]
struct MockState {
    seen: Seen,
    status: StatusCode,
    reply: serde_json::Value,
}

async fn generate(
    State(state): State<MockState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.seen.lock().unwrap().push(body);
    (state.status, Json(state.reply.clone()))
}

/// Serve `reply` with `status` at `/api/generate` on an ephemeral port.
/// Returns the full endpoint URL.
pub async fn mock_ollama(status: StatusCode, reply: serde_json::Value) -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        seen: seen.clone(),
        status,
        reply,
    };
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/generate", addr), seen)
}
