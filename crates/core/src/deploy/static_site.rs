//! Static website packaging.
//!
//! Writes the session's files under `<output_dir>/<session-id>/`, locates
//! the site entrypoint (the shallowest `index.html`) and makes sure a plain
//! `<script src="app.js">` tag loads as an ES module.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::error::BuildError;

use super::{ArtifactSet, DeploymentBuilder, PackagedOutput};

const ENTRYPOINT: &str = "index.html";

pub struct StaticSiteBuilder {
    output_dir: PathBuf,
}

impl StaticSiteBuilder {
    /// Project types this builder packages
    pub const PROJECT_TYPES: [&'static str; 3] = ["static_site", "website", "web"];

    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    async fn write_files(&self, root: &Path, artifacts: &ArtifactSet) -> Result<(), BuildError> {
        for file in &artifacts.files {
            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| packaging(format!("cannot create {}: {}", parent.display(), e)))?;
            }
            tokio::fs::write(&target, &file.contents)
                .await
                .map_err(|e| packaging(format!("cannot write {}: {}", target.display(), e)))?;
        }
        Ok(())
    }
}

fn packaging(message: impl Into<String>) -> BuildError {
    BuildError::PackagingFailed(message.into())
}

/// Shallowest `index.html` under `root`; ties break by path order
pub fn find_entrypoint(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == ENTRYPOINT)
        .min_by_key(|e| e.depth())
        .map(|e| e.into_path())
}

fn app_script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Both quote styles are spelled out so the closing quote must match the opening one
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<script\b[^>]*?\bsrc\s*=\s*(?:"app\.js"|'app\.js')[^>]*>"#).expect("static regex")
    })
}

fn type_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\stype\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>/]+))"#).expect("static regex")
    })
}

/// Make one `<script …>` tag load as a module, keeping its other attributes
fn with_module_type(tag: &str) -> Option<String> {
    if let Some(caps) = type_attr_pattern().captures(tag) {
        let value = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        if value.eq_ignore_ascii_case("module") {
            return None;
        }
        let attr = caps.get(0)?;
        return Some(format!("{} type=\"module\"{}", &tag[..attr.start()], &tag[attr.end()..]));
    }
    let close = if tag.ends_with("/>") { tag.len() - 2 } else { tag.len() - 1 };
    let head = tag[..close].trim_end();
    Some(format!("{} type=\"module\"{}", head, &tag[close..]))
}

/// Add `type="module"` to `<script src="app.js" …>` tags.
///
/// Returns `None` when nothing needed changing.
pub fn patch_module_script(html: &str) -> Option<String> {
    let mut changed = false;
    let patched = app_script_pattern().replace_all(html, |caps: &regex::Captures<'_>| {
        let tag = &caps[0];
        match with_module_type(tag) {
            Some(rewritten) => {
                changed = true;
                rewritten
            }
            None => tag.to_string(),
        }
    });
    changed.then(|| patched.into_owned())
}

#[async_trait]
impl DeploymentBuilder for StaticSiteBuilder {
    #[tracing::instrument(skip(self, artifacts), fields(session = %artifacts.session_id, files = artifacts.files.len()))]
    async fn build(&self, artifacts: &ArtifactSet, _project_type: &str) -> Result<PackagedOutput, BuildError> {
        if artifacts.files.is_empty() {
            return Err(packaging("no files were generated"));
        }

        let root = self.output_dir.join(artifacts.session_id.to_string());
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| packaging(format!("cannot create {}: {}", root.display(), e)))?;
        self.write_files(&root, artifacts).await?;

        let walk_root = root.clone();
        let entrypoint = tokio::task::spawn_blocking(move || find_entrypoint(&walk_root))
            .await
            .map_err(|e| packaging(format!("entrypoint search aborted: {}", e)))?
            .ok_or_else(|| packaging(format!("could not find {} in the generated project", ENTRYPOINT)))?;

        let html = tokio::fs::read_to_string(&entrypoint)
            .await
            .map_err(|e| packaging(format!("cannot read {}: {}", entrypoint.display(), e)))?;
        if let Some(patched) = patch_module_script(&html) {
            tokio::fs::write(&entrypoint, patched)
                .await
                .map_err(|e| packaging(format!("cannot write {}: {}", entrypoint.display(), e)))?;
            tracing::debug!(path = %entrypoint.display(), "Patched app.js script tag to type=module");
        }

        tracing::info!(entrypoint = %entrypoint.display(), "Static site packaged");
        Ok(PackagedOutput {
            package_ref: entrypoint.display().to_string(),
            root,
            entrypoint,
            file_count: artifacts.files.len(),
        })
    }
}
