//! Parsing of file artifacts embedded in model replies.
//!
//! The reply contract: a line `### FILE: <path>` immediately followed by a
//! fenced code block (three backticks, optional language tag). Everything
//! between the fences is the file body. A reply may carry any number of
//! blocks; prose around them is ignored.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

static FILE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^###\s+FILE:\s*(.*?)\s*$").expect("marker regex should be valid"));

/// A file path/content pair extracted from a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the project root, exactly as the model wrote it.
    pub path: String,
    /// File body with surrounding whitespace trimmed.
    pub content: String,
}

/// Extract all well-formed artifact blocks, in order of appearance.
///
/// Malformed blocks (no fence on the next line, or an unterminated fence) are
/// dropped; they never abort the scan. Path safety is not checked here, see
/// [`path_violation`].
pub fn parse_artifacts(text: &str) -> Vec<Artifact> {
    let lines: Vec<&str> = text.lines().collect();
    let mut artifacts = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(caps) = FILE_MARKER.captures(lines[i]) else {
            i += 1;
            continue;
        };
        let path = caps[1].to_string();

        // The fence must open on the very next line.
        let opens_fence = lines
            .get(i + 1)
            .is_some_and(|line| line.trim_start().starts_with("```"));
        if !opens_fence {
            i += 1;
            continue;
        }

        let mut body = Vec::new();
        let mut close = None;
        for (offset, line) in lines[i + 2..].iter().enumerate() {
            if line.trim() == "```" {
                close = Some(i + 2 + offset);
                break;
            }
            body.push(*line);
        }

        match close {
            Some(close) => {
                artifacts.push(Artifact {
                    path,
                    content: body.join("\n").trim().to_string(),
                });
                i = close + 1;
            }
            None => {
                // Unterminated fence: nothing after this line can be well-formed.
                break;
            }
        }
    }

    artifacts
}

/// Why a candidate artifact path must be rejected, or `None` if it is safe.
///
/// Safe means: non-empty, relative, and free of parent-directory traversal.
pub fn path_violation(path: &str) -> Option<&'static str> {
    if path.trim().is_empty() {
        return Some("empty path");
    }
    let parsed = Path::new(path);
    if parsed.is_absolute() || path.starts_with('/') {
        return Some("absolute path");
    }
    for component in parsed.components() {
        match component {
            Component::ParentDir => return Some("parent-directory traversal"),
            Component::Prefix(_) | Component::RootDir => return Some("absolute path"),
            Component::Normal(_) | Component::CurDir => {}
        }
    }
    None
}
