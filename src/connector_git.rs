//! Commit extraction from a local Git repository.
//!
//! Talks to the `git` CLI with [`std::process::Command`]; the repository is
//! only ever read. Commits come back newest-first, in `git log` traversal
//! order, with the raw message text (newlines included).
//!
//! Fields are separated with ASCII unit separators (`0x1f`) and records with
//! record separators (`0x1e`), which cannot appear in author names and do not
//! occur in ordinary commit messages.

use std::path::Path;
use std::process::{Command, Output};

use commit_harness_core::models::CommitRecord;
use commit_harness_core::RepositoryError;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ct%x1f%B%x1e";

/// Read up to `max_count` commits reachable from `branch`, newest first.
///
/// Fails with [`RepositoryError::NotARepository`] if `repo_dir` is not a git
/// work tree and [`RepositoryError::UnknownBranch`] if `branch` does not
/// resolve to a commit.
pub fn extract_commits(
    repo_dir: &Path,
    branch: &str,
    max_count: usize,
) -> Result<Vec<CommitRecord>, RepositoryError> {
    ensure_repository(repo_dir)?;
    ensure_branch(repo_dir, branch)?;

    if max_count == 0 {
        return Ok(Vec::new());
    }

    let max = max_count.to_string();
    let output = git(repo_dir, &["log", LOG_FORMAT, "-n", &max, branch, "--"])?;
    if !output.status.success() {
        return Err(RepositoryError::Git {
            command: "log".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let records = parse_log(&stdout)?;
    tracing::debug!(
        repo = %repo_dir.display(),
        branch,
        count = records.len(),
        "extracted commits"
    );
    Ok(records)
}

fn git(repo_dir: &Path, args: &[&str]) -> Result<Output, RepositoryError> {
    Ok(Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()?)
}

fn ensure_repository(repo_dir: &Path) -> Result<(), RepositoryError> {
    let not_a_repo = || RepositoryError::NotARepository {
        path: repo_dir.display().to_string(),
    };

    if !repo_dir.is_dir() {
        return Err(not_a_repo());
    }

    let output = git(repo_dir, &["rev-parse", "--git-dir"])?;
    if !output.status.success() {
        return Err(not_a_repo());
    }
    Ok(())
}

fn ensure_branch(repo_dir: &Path, branch: &str) -> Result<(), RepositoryError> {
    let unknown = || RepositoryError::UnknownBranch {
        branch: branch.to_string(),
        path: repo_dir.display().to_string(),
    };

    // A leading dash would be read as an option by git.
    if branch.is_empty() || branch.starts_with('-') {
        return Err(unknown());
    }

    let rev = format!("{}^{{commit}}", branch);
    let output = git(repo_dir, &["rev-parse", "--verify", "--quiet", &rev])?;
    if !output.status.success() {
        return Err(unknown());
    }
    Ok(())
}

/// Parse `git log` output produced with [`LOG_FORMAT`].
fn parse_log(stdout: &str) -> Result<Vec<CommitRecord>, RepositoryError> {
    let mut records = Vec::new();

    for raw in stdout.split(RECORD_SEP) {
        // git terminates each formatted record with a newline.
        let raw = raw.strip_prefix('\n').unwrap_or(raw);
        if raw.trim().is_empty() {
            continue;
        }

        let mut fields = raw.splitn(4, FIELD_SEP);
        let (Some(hexsha), Some(author), Some(ts), Some(message)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(RepositoryError::Parse(format!(
                "expected 4 fields in record starting {:?}",
                raw.chars().take(40).collect::<String>()
            )));
        };

        let committed_at = ts.trim().parse::<i64>().map_err(|_| {
            RepositoryError::Parse(format!("bad commit timestamp {:?} for {}", ts, hexsha))
        })?;

        records.push(CommitRecord {
            hexsha: hexsha.trim().to_string(),
            author: author.to_string(),
            message: message.to_string(),
            committed_at,
        });
    }

    Ok(records)
}
