//! # Roles
//!
//! The pipeline's cast as data: an ordered `Roster` of `StageSpec`s, one
//! per role. Adding or removing a role means editing the roster, not a
//! dispatch table.
//!
//! ## Default Pipeline
//!
//! ```text
//! Product Manager → Architect → Project Manager → Engineer → QA Engineer → Deployer
//! ```

pub mod task;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::generation::prompts;
use crate::pipeline::StageResult;

pub use task::{RoleOutput, RoleTask};

/// Identifier of a role, e.g. `architect`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Default per-stage time limit
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Static descriptor of one pipeline position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub role: RoleId,
    /// Human-readable role name
    pub title: String,
    /// Roles whose outputs this stage reads
    pub requires: Vec<RoleId>,
    pub allow_search: bool,
    /// Fail the stage when every search failed
    pub grounding_required: bool,
    pub timeout: Duration,
    /// Query templates; `{request}` is replaced by the project request
    pub queries: Vec<String>,
    pub system_prompt: String,
}

impl StageSpec {
    pub fn new(role: impl Into<RoleId>, title: impl Into<String>) -> Self {
        let role = role.into();
        let system_prompt = prompts::for_role(role.as_str()).to_string();
        Self {
            role,
            title: title.into(),
            requires: Vec::new(),
            allow_search: true,
            grounding_required: false,
            timeout: DEFAULT_STAGE_TIMEOUT,
            queries: Vec::new(),
            system_prompt,
        }
    }

    pub fn requires(mut self, roles: &[&str]) -> Self {
        self.requires = roles.iter().map(|r| RoleId::new(*r)).collect();
        self
    }

    pub fn with_queries(mut self, templates: &[&str]) -> Self {
        self.queries = templates.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grounding_required(mut self, required: bool) -> Self {
        self.grounding_required = required;
        self
    }

    pub fn without_search(mut self) -> Self {
        self.allow_search = false;
        self
    }

    /// Queries for a concrete request
    pub fn render_queries(&self, request: &str) -> Vec<String> {
        let request = request.trim();
        self.queries
            .iter()
            .map(|t| t.replace("{request}", request))
            .collect()
    }
}

/// Input handed to a role: the request plus outputs of earlier roles, in
/// stage order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInput {
    pub request: String,
    pub prior: Vec<(RoleId, String)>,
}

impl RoleInput {
    /// Collect the outputs a stage requires from committed results.
    ///
    /// Only successful results are read; gaps are reported by `missing`.
    pub fn assemble(request: &str, spec: &StageSpec, results: &[StageResult]) -> Self {
        let prior = results
            .iter()
            .filter(|r| r.success && spec.requires.contains(&r.role))
            .filter_map(|r| r.output.as_ref().map(|o| (r.role.clone(), o.clone())))
            .collect();
        Self {
            request: request.to_string(),
            prior,
        }
    }

    /// Required roles with no output in this input
    pub fn missing(&self, spec: &StageSpec) -> Vec<RoleId> {
        spec.requires
            .iter()
            .filter(|r| !self.prior.iter().any(|(role, _)| role == *r))
            .cloned()
            .collect()
    }

    pub fn output_of(&self, role: &RoleId) -> Option<&str> {
        self.prior
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, o)| o.as_str())
    }
}

/// Ordered role → stage mapping
#[derive(Debug, Clone)]
pub struct Roster {
    stages: Vec<StageSpec>,
}

impl Roster {
    /// Validate and wrap a stage list
    pub fn new(stages: Vec<StageSpec>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let mut seen: HashSet<&RoleId> = HashSet::new();
        for spec in &stages {
            for required in &spec.requires {
                if !seen.contains(required) {
                    return Err(ConfigError::UnorderedDependency {
                        role: spec.role.to_string(),
                        requires: required.to_string(),
                    });
                }
            }
            if !seen.insert(&spec.role) {
                return Err(ConfigError::DuplicateRole(spec.role.to_string()));
            }
            if spec.timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(format!("timeout of '{}'", spec.role)));
            }
        }

        Ok(Self { stages })
    }

    /// The six-role software pipeline
    pub fn default_pipeline() -> Self {
        Self {
            stages: default_stages(),
        }
    }

    /// Default pipeline with timeouts and grounding policy from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut stages = default_stages();
        for spec in &mut stages {
            spec.timeout = config.stage_timeout(spec.role.as_str());
            spec.grounding_required = config
                .grounding_required
                .iter()
                .any(|r| r == spec.role.as_str());
        }
        for role in &config.grounding_required {
            if !stages.iter().any(|s| s.role.as_str() == role) {
                tracing::warn!(role = %role, "grounding_required names an unknown role");
            }
        }
        Self::new(stages)
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, role: &RoleId) -> Option<&StageSpec> {
        self.stages.iter().find(|s| &s.role == role)
    }

    pub fn position(&self, role: &RoleId) -> Option<usize> {
        self.stages.iter().position(|s| &s.role == role)
    }

    /// Apply a change to one stage and re-validate
    pub fn with_stage(mut self, role: &str, edit: impl FnOnce(&mut StageSpec)) -> Result<Self, ConfigError> {
        if let Some(spec) = self.stages.iter_mut().find(|s| s.role.as_str() == role) {
            edit(spec);
        }
        Self::new(self.stages)
    }
}

fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("product_manager", "Product Manager").with_queries(&[
            "{request} app features users expect",
            "best {request} apps comparison",
        ]),
        StageSpec::new("architect", "Architect")
            .requires(&["product_manager"])
            .with_queries(&[
                "{request} web app architecture html css javascript",
                "vanilla javascript local storage best practices",
            ]),
        StageSpec::new("project_manager", "Project Manager")
            .requires(&["product_manager", "architect"])
            .with_queries(&["{request} implementation task breakdown"]),
        StageSpec::new("engineer", "Engineer")
            .requires(&["architect", "project_manager"])
            .with_queries(&["{request} javascript example code"]),
        StageSpec::new("qa_engineer", "QA Engineer")
            .requires(&["product_manager", "engineer"])
            .with_queries(&["{request} web app testing checklist"]),
        StageSpec::new("deployer", "Deployer")
            .requires(&["engineer", "qa_engineer"])
            .with_queries(&["serve static website locally es modules"]),
    ]
}
