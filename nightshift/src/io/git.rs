//! Git adapter for branch isolation and publishing.
//!
//! All automated work lands on a dedicated branch and the default branch is
//! never touched, so we keep a small, explicit wrapper around `git`
//! subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    /// True if the index side of the code marks a staged change.
    pub fn is_staged(&self) -> bool {
        match self.code.chars().next() {
            Some(c) => c != ' ' && c != '?',
            None => false,
        }
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Switch to `branch`, creating it at the current position if it does not
    /// exist yet. Idempotent: already being on the branch is a no-op, and an
    /// existing branch is checked out rather than recreated.
    #[instrument(skip_all, fields(branch))]
    pub fn ensure_branch(&self, branch: &str) -> Result<()> {
        let current = self.current_branch()?;
        if current == branch {
            debug!(branch, "already on branch");
            return Ok(());
        }
        if self.branch_exists(branch)? {
            debug!(branch, "checking out existing branch");
            self.run_checked(&["checkout", branch])
                .with_context(|| format!("checkout existing branch {branch}"))?;
        } else {
            info!(branch, "creating new branch");
            self.run_checked(&["checkout", "-b", branch])
                .with_context(|| format!("create branch {branch}"))?;
        }
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(self
            .status_porcelain()?
            .iter()
            .any(StatusEntry::is_staged))
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Push `branch` to `remote`, setting the upstream.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        info!(remote, branch, "pushing branch");
        self.run_checked(&["push", "--set-upstream", remote, branch])?;
        Ok(())
    }

    /// Stage everything and, if the stage is non-empty, commit.
    ///
    /// Returns Ok(false) when the working tree had nothing to commit. Pushing
    /// is the caller's decision.
    #[instrument(skip_all)]
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        self.add_all()?;
        self.commit_staged(message)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
        assert!(!e.is_staged());
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.rs");
        assert!(!e.is_staged());
    }

    #[test]
    fn parses_staged_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
        assert!(e.is_staged());
    }

    #[test]
    fn ensure_branch_is_idempotent() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());

        git.ensure_branch("nightshift/2026-01-01").expect("first");
        assert_eq!(
            git.current_branch().expect("branch"),
            "nightshift/2026-01-01"
        );

        git.ensure_branch("nightshift/2026-01-01").expect("second");
        assert_eq!(
            git.current_branch().expect("branch"),
            "nightshift/2026-01-01"
        );

        // Returning to the branch after leaving it must also not error.
        git.ensure_branch("other").expect("other");
        git.ensure_branch("nightshift/2026-01-01").expect("third");
        assert_eq!(
            git.current_branch().expect("branch"),
            "nightshift/2026-01-01"
        );
    }

    #[test]
    fn commit_all_is_noop_on_clean_tree() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        git.ensure_branch("nightshift/test").expect("branch");

        let committed = git.commit_all("nightly update").expect("commit_all");
        assert!(!committed);
    }

    #[test]
    fn commit_all_then_push_publishes_changes() {
        let repo = TestRepo::with_remote().expect("repo");
        let git = Git::new(repo.root());
        git.ensure_branch("nightshift/test").expect("branch");
        fs::write(repo.root().join("generated.txt"), "content\n").expect("write");

        let committed = git.commit_all("nightly update").expect("commit_all");
        assert!(committed);
        git.push("origin", "nightshift/test").expect("push");
        assert!(
            repo.remote_branch_exists("nightshift/test")
                .expect("remote check")
        );
    }
}
