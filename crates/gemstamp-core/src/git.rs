//! Git diff provider.
//!
//! Shells out to `git` so the user's configuration (diff drivers, attributes,
//! safe-directory settings) applies. The classifier only consumes the
//! [`DiffProvider`] trait; [`GitDiff`] is the production implementation.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to execute the `git` command.
    #[error("failed to run git: {0}")]
    Exec(#[from] std::io::Error),

    /// `git` returned a non-zero exit code.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed (e.g., "diff").
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// How much context to request around each diff hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffContext {
    /// Git's default (three lines).
    #[default]
    Default,
    /// No context lines (`-U0`).
    Zero,
}

/// Source of unified-diff text for a single file's pending change.
pub trait DiffProvider {
    /// Unified diff of `path` against the index, one string per line.
    fn diff(&self, path: &Utf8Path, context: DiffContext) -> GitResult<Vec<String>>;
}

/// [`DiffProvider`] backed by `git diff` in a working tree.
#[derive(Debug, Clone)]
pub struct GitDiff {
    root: Utf8PathBuf,
}

impl GitDiff {
    /// Diff files relative to the working tree at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DiffProvider for GitDiff {
    #[instrument(skip(self), fields(root = %self.root))]
    fn diff(&self, path: &Utf8Path, context: DiffContext) -> GitResult<Vec<String>> {
        let mut args = vec!["diff"];
        if context == DiffContext::Zero {
            args.push("-U0");
        }
        args.extend(["--", path.as_str()]);

        let output = git_in(&self.root, &args)?;
        let lines: Vec<String> = output.lines().map(str::to_string).collect();
        debug!(line_count = lines.len(), "diff collected");
        Ok(lines)
    }
}

/// Whether a `git` executable is on `PATH`.
pub fn git_available() -> bool {
    which::which("git").is_ok()
}

/// Check if `dir` is inside a git working tree.
#[instrument]
pub fn is_inside_repo(dir: &Utf8Path) -> GitResult<bool> {
    match git_in(dir, &["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => Ok(output.trim() == "true"),
        Err(GitError::Command { .. } | GitError::NotARepo) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Run a git command in `dir` and return its stdout.
fn git_in(dir: &Utf8Path, args: &[&str]) -> GitResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir.as_std_path())
        .output()?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if stderr.contains("not a git repository") {
            return Err(GitError::NotARepo);
        }

        Err(GitError::Command {
            command: args.first().unwrap_or(&"").to_string(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run(dir: &Utf8Path, args: &[&str]) {
        git_in(dir, args).unwrap();
    }

    fn repo() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        run(&root, &["init", "--quiet"]);
        run(&root, &["config", "user.email", "release@example.com"]);
        run(&root, &["config", "user.name", "Release Bot"]);
        (tmp, root)
    }

    #[test]
    fn git_error_on_bad_command() {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert!(git_in(&dir, &["not-a-real-subcommand"]).is_err());
    }

    #[test]
    fn outside_repo_is_not_a_repo() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert!(!is_inside_repo(&dir).unwrap());
    }

    #[test]
    fn diff_reports_added_lines() {
        if !git_available() {
            return;
        }
        let (_tmp, root) = repo();
        let file = root.join("partitions.rb");
        std::fs::write(&file, "map = {\n}\n").unwrap();
        run(&root, &["add", "."]);
        run(&root, &["commit", "--quiet", "-m", "init"]);

        std::fs::write(&file, "map = {\n    'Foo' => 'foo',\n}\n").unwrap();

        let lines = GitDiff::new(root.clone())
            .diff(Utf8Path::new("partitions.rb"), DiffContext::Zero)
            .unwrap();
        assert!(lines.iter().any(|l| l == "+    'Foo' => 'foo',"));
        assert!(!lines.iter().any(|l| l == " map = {"), "zero context has no context lines");

        let with_context = GitDiff::new(root)
            .diff(Utf8Path::new("partitions.rb"), DiffContext::Default)
            .unwrap();
        assert!(with_context.iter().any(|l| l == " map = {"));
    }
}
