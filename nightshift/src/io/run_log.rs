//! Run transcripts under `.nightshift/runs/<run_id>/`.
//!
//! Transcripts are operator-facing artifacts: every model reply, every
//! validation log, and a final `run.json` summary. They are advisory: call
//! sites downgrade write failures to warnings so a full disk never kills a
//! run that is otherwise working.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::core::types::{RunStatus, Stage};

/// Process-local identifier for one run, derived from the UTC start time.
pub fn generate_run_id() -> String {
    Utc::now().format("run-%Y%m%d_%H%M%S").to_string()
}

/// Final record written to `run.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub branch: String,
    pub status: RunStatus,
    pub files: Vec<String>,
    pub repair_attempts: u32,
    pub pushed: bool,
    pub started_at: String,
    pub finished_at: String,
}

/// Transcript writer for a single run.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(".nightshift").join("runs").join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a model reply for a stage. `round` is 0 except for repair
    /// cycles, which are 1-indexed.
    pub fn write_stage_response(&self, stage: Stage, round: u32, text: &str) -> Result<()> {
        write_text(&self.dir.join(transcript_name(stage, round)), text)
    }

    /// Record a validation log. `round` 0 is the initial run, 1.. are
    /// post-repair reruns.
    pub fn write_validation_log(&self, round: u32, log: &str) -> Result<()> {
        write_text(&self.dir.join(format!("validate-{round}.log")), log)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        write_json(&self.dir.join("run.json"), summary)
    }
}

/// Ordinal-prefixed transcript file name, so a directory listing reads in
/// stage order: `01-plan.md`, `02-implement.md`, `03-repair-1.md`,
/// `04-document.md`.
fn transcript_name(stage: Stage, round: u32) -> String {
    let ordinal = match stage {
        Stage::Plan => "01",
        Stage::Implement => "02",
        Stage::Validate | Stage::Repair => "03",
        Stage::Document | Stage::Publish => "04",
    };
    if round == 0 {
        format!("{ordinal}-{}.md", stage.as_str())
    } else {
        format!("{ordinal}-{}-{round}.md", stage.as_str())
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_text(path, &buf)
}
