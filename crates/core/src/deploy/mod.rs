//! # Deployment
//!
//! The terminal step: turn a session's artifacts into a runnable package.
//! Builders are selected by project type through the `BuilderRegistry`;
//! `preview` serves a finished package on localhost.

pub mod artifacts;
pub mod preview;
pub mod static_site;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::BuildError;

pub use artifacts::{extract_files, ArtifactFile, ArtifactSet};
pub use preview::{PreviewHost, PreviewServer, PreviewUrl, DEFAULT_PREVIEW_PORT};
pub use static_site::StaticSiteBuilder;

/// A packaged, runnable result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedOutput {
    /// Opaque reference reported to the caller
    pub package_ref: String,
    pub root: PathBuf,
    pub entrypoint: PathBuf,
    pub file_count: usize,
}

#[async_trait]
pub trait DeploymentBuilder: Send + Sync {
    async fn build(&self, artifacts: &ArtifactSet, project_type: &str) -> Result<PackagedOutput, BuildError>;
}

/// Routes a project type to the builder that supports it
#[derive(Default, Clone)]
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn DeploymentBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the static-site builder under its usual type names
    pub fn with_static_site(output_dir: impl Into<PathBuf>) -> Self {
        let builder: Arc<dyn DeploymentBuilder> = Arc::new(StaticSiteBuilder::new(output_dir));
        let mut registry = Self::new();
        for project_type in StaticSiteBuilder::PROJECT_TYPES {
            registry.register(project_type, Arc::clone(&builder));
        }
        registry
    }

    pub fn register(&mut self, project_type: &str, builder: Arc<dyn DeploymentBuilder>) {
        self.builders.insert(normalize(project_type), builder);
    }

    pub fn supports(&self, project_type: &str) -> bool {
        self.builders.contains_key(&normalize(project_type))
    }

    pub fn project_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.builders.keys().cloned().collect();
        types.sort();
        types
    }
}

fn normalize(project_type: &str) -> String {
    project_type.trim().to_lowercase().replace('-', "_")
}

#[async_trait]
impl DeploymentBuilder for BuilderRegistry {
    async fn build(&self, artifacts: &ArtifactSet, project_type: &str) -> Result<PackagedOutput, BuildError> {
        let builder = self
            .builders
            .get(&normalize(project_type))
            .ok_or_else(|| BuildError::UnsupportedProjectType(project_type.to_string()))?;
        builder.build(artifacts, project_type).await
    }
}
