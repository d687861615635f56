//! # Search Client
//!
//! Wraps a `SearchProvider` so that every call leaves exactly one
//! `search_started` and one terminal entry in the activity log, whatever
//! the outcome: success, provider error, timeout, cancellation or a
//! panicking provider.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::activity::{LogKind, SessionRecorder};
use crate::error::SearchError;
use crate::pipeline::ProgressKind;
use crate::roles::RoleId;

use super::{summarize_hits, SearchProvider, SearchQuery, SearchResult};

/// Per-call limits
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub max_results: usize,
    /// Provider-level timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 5,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// A query paired with its outcome
#[derive(Debug, Clone)]
pub struct IssuedSearch {
    pub query: SearchQuery,
    pub outcome: Result<SearchResult, SearchError>,
}

/// Logged search access for one session. Cheap to clone into tasks.
#[derive(Clone)]
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    recorder: SessionRecorder,
    settings: SearchSettings,
}

impl SearchClient {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        recorder: SessionRecorder,
        settings: SearchSettings,
    ) -> Self {
        Self {
            provider,
            recorder,
            settings,
        }
    }

    /// Run one query on behalf of `role`
    pub async fn search(
        &self,
        query: &str,
        role: &RoleId,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, SearchError> {
        self.issue(query, role, cancel).await.outcome
    }

    /// Run one query and keep the issued `SearchQuery` alongside the outcome
    pub async fn issue(&self, text: &str, role: &RoleId, cancel: &CancellationToken) -> IssuedSearch {
        let query = SearchQuery::new(text.trim(), role.clone());

        self.recorder
            .record(
                role,
                LogKind::SearchStarted,
                format!("[{}] {}", self.provider.name(), query.text),
                Some(query.id),
                ProgressKind::SearchStarted {
                    role: role.clone(),
                    query: query.text.clone(),
                },
            )
            .await;

        let outcome = if query.text.is_empty() {
            Err(SearchError::invalid_query("query is empty"))
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SearchError::cancelled()),
                outcome = self.call_provider(&query.text) => outcome,
            }
        };

        match &outcome {
            Ok(result) => {
                tracing::debug!(role = %role, query = %query.text, hits = result.len(), "Search completed");
                self.recorder
                    .record(
                        role,
                        LogKind::SearchCompleted,
                        format!(
                            "{} -> {} results in {}ms: {}",
                            query.text,
                            result.len(),
                            result.latency.as_millis(),
                            summarize_hits(&result.hits, 3)
                        ),
                        Some(query.id),
                        ProgressKind::SearchCompleted {
                            role: role.clone(),
                            query: query.text.clone(),
                            result_count: result.len(),
                        },
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(role = %role, query = %query.text, error = %err, "Search failed");
                self.recorder
                    .record(
                        role,
                        LogKind::SearchFailed,
                        format!("{} -> {}", query.text, err),
                        Some(query.id),
                        ProgressKind::SearchFailed {
                            role: role.clone(),
                            query: query.text.clone(),
                            error_kind: err.kind,
                        },
                    )
                    .await;
            }
        }

        IssuedSearch { query, outcome }
    }

    async fn call_provider(&self, text: &str) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let call = AssertUnwindSafe(self.provider.search(text, self.settings.max_results)).catch_unwind();

        let caught = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(caught) => caught,
                Err(_) => return Err(SearchError::timeout(limit)),
            },
            None => call.await,
        };

        match caught {
            Ok(Ok(mut hits)) => {
                hits.truncate(self.settings.max_results);
                Ok(SearchResult::new(hits, started.elapsed()))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SearchError::unavailable(format!(
                "{} provider panicked",
                self.provider.name()
            ))),
        }
    }
}
