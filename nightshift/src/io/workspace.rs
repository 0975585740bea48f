//! Applies extracted artifacts to the working tree and summarizes the
//! project for prompts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::artifact::{Artifact, path_violation};

/// Directory names never included in the project listing.
const SKIPPED_DIRS: [&str; 3] = ["target", "node_modules", "__pycache__"];

/// Write each artifact to disk under `root`, in order.
///
/// Unsafe paths are skipped with a warning; they never abort the batch and
/// never touch the file system. Existing files are fully overwritten. Returns
/// the relative paths actually written, in order of appearance.
pub fn apply_artifacts(root: &Path, artifacts: &[Artifact]) -> Result<Vec<String>> {
    let mut written = Vec::new();
    for artifact in artifacts {
        if let Some(violation) = path_violation(&artifact.path) {
            warn!(path = %artifact.path, violation, "skipping unsafe artifact path");
            continue;
        }
        let target = root.join(&artifact.path);
        if let Some(parent) = target.parent()
            && parent != root
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, &artifact.content)
            .with_context(|| format!("write {}", target.display()))?;
        debug!(path = %artifact.path, bytes = artifact.content.len(), "artifact written");
        written.push(artifact.path.clone());
    }
    Ok(written)
}

/// Bounded, deterministic listing of project files for the planning prompt.
///
/// Hidden entries and build/cache directories are skipped. Paths are relative
/// to `root`, sorted, one per line, capped at `max_entries` with a trailing
/// notice when truncated.
pub fn project_listing(root: &Path, max_entries: usize) -> Result<String> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries)?;
    entries.sort();

    let total = entries.len();
    entries.truncate(max_entries);
    let mut buf = entries.join("\n");
    if total > max_entries {
        buf.push_str(&format!("\n[... {} more entries]", total - max_entries));
    }
    Ok(buf)
}

fn collect_files(root: &Path, dir: &Path, entries: &mut Vec<String>) -> Result<()> {
    let read = fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    for entry in read {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;

        if name.starts_with('.') {
            continue;
        }
        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            collect_files(root, &path, entries)?;
        } else if file_type.is_file()
            && let Ok(relative) = path.strip_prefix(root)
        {
            entries.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Ensure `.nightshift/.gitignore` keeps transcripts and memory out of the
/// published branch.
pub fn ensure_ignore_rules(root: &Path) -> Result<()> {
    const REQUIRED_LINES: [&str; 2] = ["memory.json", "runs/"];

    let path = root.join(".nightshift").join(".gitignore");
    let mut existing = String::new();
    if path.exists() {
        existing = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    }

    let mut lines: Vec<String> = existing
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    for required in REQUIRED_LINES {
        if !lines.iter().any(|l| l == required) {
            lines.push(required.to_string());
        }
    }

    // Stable ordering.
    lines.sort();
    lines.dedup();

    let mut out = lines.join("\n");
    out.push('\n');

    if out != existing {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
    }

    Ok(())
}
