//! Files extracted from the generated outputs of a session.
//!
//! File-producing roles emit fenced blocks whose info string carries a
//! relative path:
//!
//! ````text
//! ```html index.html
//! <!doctype html>
//! ```
//! ````
//!
//! Blocks are read in stage order; a later block for the same path replaces
//! the earlier one, so QA corrections win over the engineer's first draft.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::pipeline::{SessionId, StageResult};
use crate::roles::RoleId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Always relative, never escapes the package root
    pub path: PathBuf,
    pub contents: String,
    /// Role whose output supplied the final contents
    pub role: RoleId,
}

/// Everything the builder needs from a completed set of stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub session_id: SessionId,
    pub request: String,
    /// Stage outputs in pipeline order
    pub outputs: Vec<(RoleId, String)>,
    pub files: Vec<ArtifactFile>,
}

impl ArtifactSet {
    pub fn from_results(session_id: SessionId, request: &str, results: &[StageResult]) -> Self {
        let outputs: Vec<(RoleId, String)> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.output.clone().map(|o| (r.role.clone(), o)))
            .collect();

        let mut files: Vec<ArtifactFile> = Vec::new();
        for (role, output) in &outputs {
            for (path, contents) in extract_files(output) {
                match files.iter_mut().find(|f| f.path == path) {
                    Some(existing) => {
                        existing.contents = contents;
                        existing.role = role.clone();
                    }
                    None => files.push(ArtifactFile {
                        path,
                        contents,
                        role: role.clone(),
                    }),
                }
            }
        }

        Self {
            session_id,
            request: request.to_string(),
            outputs,
            files,
        }
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.path == path.as_ref())
    }
}

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-./]*[A-Za-z0-9_\-]\.[A-Za-z0-9]+$").expect("static regex")
    })
}

/// Path named in a fence info string, if any
fn fence_path(info: &str) -> Option<PathBuf> {
    let token = info.split_whitespace().rev().find_map(|t| {
        let t = t
            .trim_start_matches("path=")
            .trim_start_matches("file=")
            .trim_matches(|c| c == '"' || c == '\'');
        path_pattern().is_match(t).then_some(t)
    })?;
    let path = PathBuf::from(token.trim_start_matches("./"));
    let relative = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (relative && !path.as_os_str().is_empty()).then_some(path)
}

/// `(path, contents)` for every fenced block that names a safe relative path
pub fn extract_files(text: &str) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let mut current: Option<(Option<PathBuf>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    current = Some((fence_path(info), Vec::new()));
                }
            }
            Some((path, mut body)) => {
                if trimmed.trim_end() == "```" {
                    if let Some(path) = path {
                        let mut contents = body.join("\n");
                        contents.push('\n');
                        files.push((path, contents));
                    }
                } else {
                    body.push(line);
                    current = Some((path, body));
                }
            }
        }
    }

    if current.is_some_and(|(path, _)| path.is_some()) {
        tracing::warn!("Ignoring unterminated file block in generated output");
    }
    files
}
