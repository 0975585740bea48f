//! Bounded conversation memory carried across runs.
//!
//! Stores the most recent turns at `.nightshift/memory.json` so the next
//! night's run can seed its conversation with yesterday's context. Eviction
//! is keep-most-recent: the oldest turns drop first.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::conversation::{Conversation, Turn};

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    turns: Vec<Turn>,
}

/// Load/save of the trimmed conversation tail.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
    max_turns: usize,
}

impl MemoryStore {
    pub fn new(root: &Path, max_turns: usize) -> Self {
        Self {
            path: root.join(".nightshift").join("memory.json"),
            max_turns,
        }
    }

    /// Previously stored turns, oldest first. A missing file is an empty
    /// history, not an error.
    pub fn load(&self) -> Result<Vec<Turn>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory {}", self.path.display()))?;
        let file: MemoryFile = serde_json::from_str(&contents)
            .with_context(|| format!("parse memory {}", self.path.display()))?;
        debug!(turns = file.turns.len(), "memory loaded");
        Ok(file.turns)
    }

    /// Persist the most recent `max_turns` turns of `conversation`.
    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        let file = MemoryFile {
            turns: conversation.tail(self.max_turns).to_vec(),
        };
        let mut buf = serde_json::to_string_pretty(&file).context("serialize memory")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(turns = file.turns.len(), "memory saved");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("memory path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp memory {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace memory {}", path.display()))?;
    Ok(())
}
