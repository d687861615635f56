//! # Pipeline Configuration
//!
//! Persisted as JSON at `.guild/config.json`. A missing file yields the
//! defaults; partial overrides (CLI flags) are layered on with `merge`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::DEFAULT_PREVIEW_PORT;
use crate::error::ConfigError;
use crate::models::{LlmProvider, ModelConfig};
use crate::search::SearchSettings;

/// Default config location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = ".guild/config.json";

/// Web search settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// `serper`, `searxng` or `none`
    pub provider: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    /// Custom SearXNG instance (overrides auto-discovery)
    pub searxng_url: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "serper".to_string(),
            max_results: 5,
            timeout_secs: 10,
            searxng_url: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settings(&self) -> SearchSettings {
        SearchSettings {
            max_results: self.max_results.max(1),
            timeout: Some(self.timeout()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Selects the deployment builder
    pub project_type: String,
    /// Packages are written to `<output_dir>/<session-id>/`
    pub output_dir: PathBuf,
    /// SQLite history; `None` disables archiving
    pub archive_path: Option<PathBuf>,
    pub global_provider: LlmProvider,
    pub global_model: Option<String>,
    pub base_url: Option<String>,
    /// Per-role model overrides (role -> model name)
    pub per_role_models: HashMap<String, String>,
    /// Per-role provider overrides (role -> provider)
    pub per_role_providers: HashMap<String, LlmProvider>,
    pub search: SearchConfig,
    pub default_stage_timeout_secs: u64,
    /// Per-role timeout overrides in seconds
    pub stage_timeouts: HashMap<String, u64>,
    /// Roles that fail when every one of their searches failed
    pub grounding_required: Vec<String>,
    /// Local port for `guild serve` and `--serve`
    pub preview_port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_type: "static_site".to_string(),
            output_dir: PathBuf::from(".guild/output"),
            archive_path: Some(PathBuf::from(".guild/history.db")),
            global_provider: LlmProvider::OpenAI,
            global_model: None,
            base_url: None,
            per_role_models: HashMap::new(),
            per_role_providers: HashMap::new(),
            search: SearchConfig::default(),
            default_stage_timeout_secs: 300,
            stage_timeouts: HashMap::new(),
            grounding_required: Vec::new(),
            preview_port: DEFAULT_PREVIEW_PORT,
        }
    }
}

/// Partial configuration layered over a loaded one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub project_type: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub global_provider: Option<LlmProvider>,
    pub global_model: Option<String>,
    pub base_url: Option<String>,
    pub search_provider: Option<String>,
    pub searxng_url: Option<String>,
    pub default_stage_timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Read the config at `path`, falling back to defaults when it does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn merge(&mut self, other: ConfigOverrides) {
        if let Some(project_type) = other.project_type {
            self.project_type = project_type;
        }
        if let Some(output_dir) = other.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(provider) = other.global_provider {
            self.global_provider = provider;
        }
        if other.global_model.is_some() {
            self.global_model = other.global_model;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if let Some(provider) = other.search_provider {
            self.search.provider = provider;
        }
        if other.searxng_url.is_some() {
            self.search.searxng_url = other.searxng_url;
        }
        if let Some(secs) = other.default_stage_timeout_secs {
            self.default_stage_timeout_secs = secs;
        }
    }

    /// Model used by roles without an override
    pub fn global_model_config(&self) -> ModelConfig {
        let provider = self.global_provider.clone();
        let model = self
            .global_model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        ModelConfig {
            provider,
            model,
            base_url: self.base_url.clone(),
        }
    }

    /// Model for a role: per-role override, then global, then provider default.
    ///
    /// `base_url` belongs to the global provider and is dropped for roles
    /// routed to a different one.
    pub fn model_config(&self, role: &str) -> ModelConfig {
        let provider = self
            .per_role_providers
            .get(role)
            .cloned()
            .unwrap_or_else(|| self.global_provider.clone());

        let model = self
            .per_role_models
            .get(role)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider == self.global_provider {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }

    /// Reject timeouts that would fail every stage before it starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_stage_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("default_stage_timeout_secs".to_string()));
        }
        let mut zero: Vec<&String> = self
            .stage_timeouts
            .iter()
            .filter(|(_, secs)| **secs == 0)
            .map(|(role, _)| role)
            .collect();
        zero.sort();
        match zero.first() {
            Some(role) => Err(ConfigError::ZeroTimeout(format!("stage_timeouts.{}", role))),
            None => Ok(()),
        }
    }

    pub fn stage_timeout(&self, role: &str) -> Duration {
        let secs = self
            .stage_timeouts
            .get(role)
            .copied()
            .unwrap_or(self.default_stage_timeout_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::load(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.project_type, "static_site");
        assert_eq!(config.search.provider, "serper");
    }

    #[tokio::test]
    async fn test_partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"project_type":"website","search":{"provider":"searxng"},"stage_timeouts":{"engineer":900}}"#,
        )
        .await
        .unwrap();

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config.project_type, "website");
        assert_eq!(config.search.provider, "searxng");
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.stage_timeout("engineer"), Duration::from_secs(900));
        assert_eq!(config.stage_timeout("architect"), Duration::from_secs(300));
        assert_eq!(config.preview_port, 9000);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(PipelineConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut config = PipelineConfig::default();
        config.grounding_required = vec!["architect".to_string()];
        config.save(&path).await.unwrap();
        assert_eq!(PipelineConfig::load(&path).await.unwrap(), config);
    }

    #[test]
    fn test_model_resolution_order() {
        let mut config = PipelineConfig {
            global_model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        };
        config
            .per_role_providers
            .insert("engineer".to_string(), LlmProvider::DeepSeek);
        config
            .per_role_models
            .insert("engineer".to_string(), "deepseek-coder".to_string());

        let engineer = config.model_config("engineer");
        assert_eq!(engineer.provider, LlmProvider::DeepSeek);
        assert_eq!(engineer.model, "deepseek-coder");

        let architect = config.model_config("architect");
        assert_eq!(architect.provider, LlmProvider::OpenAI);
        assert_eq!(architect.model, "gpt-4o-mini");

        config.global_model = None;
        config.per_role_models.clear();
        assert_eq!(config.model_config("engineer").model, "deepseek-chat");
    }

    #[test]
    fn test_base_url_only_applies_to_global_provider() {
        let mut config = PipelineConfig {
            base_url: Some("http://localhost:8080/v1".to_string()),
            ..Default::default()
        };
        config
            .per_role_providers
            .insert("engineer".to_string(), LlmProvider::DeepSeek);
        config
            .per_role_providers
            .insert("architect".to_string(), LlmProvider::OpenAI);

        assert_eq!(config.model_config("engineer").base_url, None);
        assert_eq!(
            config.model_config("engineer").completions_url(),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            config.model_config("architect").base_url.as_deref(),
            Some("http://localhost:8080/v1")
        );
        assert_eq!(
            config.model_config("qa_engineer").completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));

        let config = PipelineConfig {
            default_stage_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("default_stage_timeout_secs".to_string()))
        );

        let mut config = PipelineConfig::default();
        config.stage_timeouts.insert("engineer".to_string(), 900);
        config.stage_timeouts.insert("qa_engineer".to_string(), 0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("stage_timeouts.qa_engineer".to_string()))
        );
    }

    #[test]
    fn test_merge_only_overrides_present_fields() {
        let mut config = PipelineConfig::default();
        config.merge(ConfigOverrides {
            project_type: Some("web".to_string()),
            search_provider: Some("none".to_string()),
            ..Default::default()
        });
        assert_eq!(config.project_type, "web");
        assert_eq!(config.search.provider, "none");
        assert_eq!(config.output_dir, PathBuf::from(".guild/output"));
        assert_eq!(config.global_provider, LlmProvider::OpenAI);
    }
}
