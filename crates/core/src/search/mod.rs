//! # Web Search
//!
//! Value types for grounding queries, the provider seam, and the
//! `SearchClient` that logs every call.
//!
//! ## Providers
//!
//! - `serper` - Google results through serper.dev (`SERPER_API_KEY`)
//! - `searxng` - self-hosted or public SearXNG instances
//! - `none` - search disabled, every call fails with `ProviderUnavailable`

pub mod client;
pub mod searxng;
pub mod serper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::roles::RoleId;

pub use client::{IssuedSearch, SearchClient, SearchSettings};
pub use searxng::SearxngProvider;
pub use serper::SerperProvider;

/// Correlates a query with its log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for QueryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A query as issued by a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: QueryId,
    pub text: String,
    pub role: RoleId,
    pub issued_at: DateTime<Utc>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, role: RoleId) -> Self {
        Self {
            id: QueryId::new(),
            text: text.into(),
            role,
            issued_at: Utc::now(),
        }
    }
}

/// A single ranked hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Hits returned for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Ranked best-first
    pub hits: Vec<SearchHit>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub success: bool,
}

impl SearchResult {
    pub fn new(hits: Vec<SearchHit>, latency: Duration) -> Self {
        Self {
            hits,
            latency,
            success: true,
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// External search capability
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Provider used when web search is switched off
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::unavailable("web search is disabled"))
    }
}

/// Build the provider named in the configuration
pub fn provider_from_config(config: &SearchConfig) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    match config.provider.as_str() {
        "serper" => Ok(Arc::new(SerperProvider::from_env(config.timeout()))),
        "searxng" => Ok(Arc::new(SearxngProvider::new(
            config.searxng_url.clone(),
            config.timeout(),
        ))),
        "none" => Ok(Arc::new(DisabledSearch)),
        other => Err(ConfigError::UnknownSearchProvider(other.to_string())),
    }
}

/// Short, log-safe summary of hits
pub fn summarize_hits(hits: &[SearchHit], limit: usize) -> String {
    let mut titles: Vec<String> = hits
        .iter()
        .take(limit)
        .map(|h| truncate(&h.title, 60))
        .collect();
    if hits.len() > limit {
        titles.push(format!("+{} more", hits.len() - limit));
    }
    titles.join("; ")
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
