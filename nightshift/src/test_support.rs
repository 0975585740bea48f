//! Shared helpers for unit and integration tests.
//!
//! Compiled into the crate only for tests, or for dependents that enable the
//! `test-support` feature.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::core::conversation::Turn;
use crate::core::types::ValidationResult;
use crate::io::model::{ModelClient, ModelError};
use crate::io::notify::Notifier;
use crate::io::validation::ValidationRunner;

/// A throwaway git repository with one initial commit, optionally wired to a
/// bare "origin" remote.
pub struct TestRepo {
    workdir: TempDir,
    remote: Option<TempDir>,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let workdir = TempDir::new().context("create temp workdir")?;
        git(workdir.path(), &["init", "--initial-branch=main"])?;
        git(workdir.path(), &["config", "user.name", "Test"])?;
        git(workdir.path(), &["config", "user.email", "test@example.com"])?;
        std::fs::write(workdir.path().join("README.md"), "# test repo\n")
            .context("write README")?;
        git(workdir.path(), &["add", "README.md"])?;
        git(workdir.path(), &["commit", "-m", "initial"])?;
        Ok(Self {
            workdir,
            remote: None,
        })
    }

    /// A repo whose `origin` points at a local bare repository, so pushes
    /// succeed without a network.
    pub fn with_remote() -> Result<Self> {
        let mut repo = Self::new()?;
        let remote = TempDir::new().context("create temp remote")?;
        git(remote.path(), &["init", "--bare", "--initial-branch=main"])?;
        let url = remote
            .path()
            .to_str()
            .context("remote path is not valid UTF-8")?
            .to_string();
        git(repo.workdir.path(), &["remote", "add", "origin", &url])?;
        repo.remote = Some(remote);
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.workdir.path()
    }

    /// Whether `branch` exists in the bare remote.
    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let remote = self
            .remote
            .as_ref()
            .context("repo was created without a remote")?;
        let status = Command::new("git")
            .current_dir(remote.path())
            .args([
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])
            .status()
            .context("run git show-ref")?;
        Ok(status.success())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .with_context(|| format!("run git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// A model client that replays a fixed script of replies.
pub struct ScriptedModel {
    script: RefCell<VecDeque<Result<String, ModelError>>>,
    repeat: Option<ModelError>,
    calls: Cell<u32>,
    last_request: RefCell<Vec<Turn>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            script: RefCell::new(replies.into()),
            repeat: None,
            calls: Cell::new(0),
            last_request: RefCell::new(Vec::new()),
        }
    }

    /// Fails every call with a clone of `err`.
    pub fn always(err: ModelError) -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            repeat: Some(err),
            calls: Cell::new(0),
            last_request: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    /// The turns sent with the most recent call.
    pub fn last_request(&self) -> Vec<Turn> {
        self.last_request.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn generate(&self, turns: &[Turn]) -> Result<String, ModelError> {
        self.calls.set(self.calls.get() + 1);
        *self.last_request.borrow_mut() = turns.to_vec();
        if let Some(err) = &self.repeat {
            return Err(err.clone());
        }
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted model ran out of replies on call {}", self.calls.get()))
    }
}

/// A validation runner that replays a fixed script of results.
pub struct ScriptedValidation {
    script: RefCell<VecDeque<ValidationResult>>,
    calls: Cell<u32>,
}

impl ScriptedValidation {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self {
            script: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl ValidationRunner for ScriptedValidation {
    fn run(&self) -> Result<ValidationResult> {
        self.calls.set(self.calls.get() + 1);
        self.script
            .borrow_mut()
            .pop_front()
            .with_context(|| format!("scripted validation ran out of results on call {}", self.calls.get()))
    }
}

/// A notifier that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: RefCell<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        self.messages.borrow_mut().push(message.to_string());
        Ok(())
    }
}

/// A model reply containing exactly one file block.
pub fn file_block(path: &str, content: &str) -> String {
    format!("### FILE: {path}\n```\n{content}\n```\n")
}
