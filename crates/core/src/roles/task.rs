//! # Role Task
//!
//! One role's unit of work inside a stage: issue the role's queries
//! concurrently, gather every outcome, then make a single generation call
//! grounded on whatever succeeded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::RoleTaskError;
use crate::generation::{GenerationRequest, Generator};
use crate::search::{IssuedSearch, SearchClient, SearchHit, SearchQuery};

use super::{RoleInput, StageSpec};

/// What a role produced
#[derive(Debug, Clone)]
pub struct RoleOutput {
    pub text: String,
    /// Search hits folded into the prompt
    pub grounding: Vec<SearchHit>,
    pub searches_succeeded: usize,
    pub searches_failed: usize,
}

pub struct RoleTask {
    spec: StageSpec,
    search: SearchClient,
    generator: Arc<dyn Generator>,
    project_type: String,
    cancel: CancellationToken,
    issued: Mutex<Vec<SearchQuery>>,
}

impl RoleTask {
    pub fn new(
        spec: StageSpec,
        search: SearchClient,
        generator: Arc<dyn Generator>,
        project_type: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            search,
            generator,
            project_type: project_type.into(),
            cancel,
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Queries issued so far, in the order they were spawned
    pub fn issued_queries(&self) -> Vec<SearchQuery> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[tracing::instrument(skip(self, input), fields(role = %self.spec.role))]
    pub async fn execute(&self, input: &RoleInput, allow_search: bool) -> Result<RoleOutput, RoleTaskError> {
        let missing = input.missing(&self.spec);
        if !missing.is_empty() {
            return Err(RoleTaskError::InvalidInput {
                missing: missing.iter().map(|r| r.to_string()).collect(),
            });
        }

        let queries = if allow_search {
            self.spec.render_queries(&input.request)
        } else {
            Vec::new()
        };
        let outcomes = self.search_all(&queries).await;

        if self.cancel.is_cancelled() {
            return Err(RoleTaskError::Cancelled);
        }

        let succeeded = outcomes.iter().filter(|s| s.outcome.is_ok()).count();
        let failed = outcomes.len() - succeeded;
        if self.spec.grounding_required && succeeded == 0 {
            return Err(RoleTaskError::GroundingUnavailable {
                attempted: outcomes.len(),
            });
        }
        if failed > 0 {
            tracing::info!(succeeded, failed, "Continuing with partial grounding");
        }

        let grounding = merge_hits(&outcomes);
        let request = GenerationRequest::for_stage(&self.spec, input, &grounding, &self.project_type);

        let text = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RoleTaskError::Cancelled),
            generated = self.generator.generate(&request) => generated?,
        };

        Ok(RoleOutput {
            text,
            grounding,
            searches_succeeded: succeeded,
            searches_failed: failed,
        })
    }

    /// Scatter every query, gather every outcome, in query order
    async fn search_all(&self, queries: &[String]) -> Vec<IssuedSearch> {
        let mut join_set = JoinSet::new();
        for (index, text) in queries.iter().enumerate() {
            let client = self.search.clone();
            let role = self.spec.role.clone();
            let cancel = self.cancel.clone();
            let text = text.clone();
            join_set.spawn(async move { (index, client.issue(&text, &role, &cancel).await) });
        }

        let mut outcomes = Vec::with_capacity(queries.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                // SearchClient contains provider panics; this is a bug in the client itself
                Err(e) => tracing::error!(error = %e, "Search task aborted"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let outcomes: Vec<IssuedSearch> = outcomes.into_iter().map(|(_, issued)| issued).collect();
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes.iter().map(|s| s.query.clone()));
        outcomes
    }
}

/// Hits from successful searches, first occurrence of each URL wins
fn merge_hits(outcomes: &[IssuedSearch]) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    outcomes
        .iter()
        .filter_map(|s| s.outcome.as_ref().ok())
        .flat_map(|result| result.hits.iter())
        .filter(|hit| seen.insert(hit.url.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityLog, LogKind, SessionRecorder};
    use crate::error::SearchErrorKind;
    use crate::pipeline::SessionId;
    use crate::roles::{RoleId, Roster};
    use crate::search::SearchSettings;
    use crate::test_support::{GenScript, ScriptedGenerator, ScriptedSearch, SearchScript};
    use std::time::Duration;

    struct Fixture {
        log: Arc<ActivityLog>,
        session: SessionId,
        generator: Arc<ScriptedGenerator>,
    }

    fn task_for(role: &str, provider: ScriptedSearch, generator: ScriptedGenerator) -> (RoleTask, Fixture) {
        let spec = Roster::default_pipeline()
            .get(&RoleId::new(role))
            .cloned()
            .unwrap();
        task_with_spec(spec, provider, generator, CancellationToken::new())
    }

    fn task_with_spec(
        spec: StageSpec,
        provider: ScriptedSearch,
        generator: ScriptedGenerator,
        cancel: CancellationToken,
    ) -> (RoleTask, Fixture) {
        let log = Arc::new(ActivityLog::new());
        let session = SessionId::new();
        let recorder = SessionRecorder::new(session, Arc::clone(&log), None);
        let client = SearchClient::new(Arc::new(provider), recorder, SearchSettings::default());
        let generator = Arc::new(generator);
        let task = RoleTask::new(spec, client, generator.clone(), "static_site", cancel);
        (
            task,
            Fixture {
                log,
                session,
                generator,
            },
        )
    }

    fn input(prior: &[&str]) -> RoleInput {
        RoleInput {
            request: "todo list".to_string(),
            prior: prior
                .iter()
                .map(|r| (RoleId::new(*r), format!("{} output", r)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_searches_then_generates_with_grounding() {
        let (task, fx) = task_for("product_manager", ScriptedSearch::always(2), ScriptedGenerator::new());

        let output = task.execute(&input(&[]), true).await.unwrap();
        assert_eq!(output.searches_succeeded, 2);
        assert_eq!(output.grounding.len(), 4);
        assert_eq!(task.issued_queries().len(), 2);

        let requests = fx.generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].grounding_count, 4);

        let kinds: Vec<_> = fx.log.entries_for(fx.session).iter().map(|e| e.kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == LogKind::SearchStarted).count(), 2);
        assert_eq!(kinds.iter().filter(|k| k.is_search_terminal()).count(), 2);
    }

    #[tokio::test]
    async fn test_partial_search_failure_still_generates() {
        let provider = ScriptedSearch::always(1)
            .with_rule("comparison", SearchScript::Fail(SearchErrorKind::RateLimited));
        let (task, fx) = task_for("product_manager", provider, ScriptedGenerator::new());

        let output = task.execute(&input(&[]), true).await.unwrap();
        assert_eq!(output.searches_succeeded, 1);
        assert_eq!(output.searches_failed, 1);
        assert_eq!(fx.generator.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_all_searches_failing_is_fine_without_grounding_policy() {
        let provider = ScriptedSearch::new(SearchScript::Fail(SearchErrorKind::ProviderUnavailable));
        let (task, fx) = task_for("architect", provider, ScriptedGenerator::new());

        let output = task.execute(&input(&["product_manager"]), true).await.unwrap();
        assert!(output.grounding.is_empty());
        assert!(fx.generator.requests()[0]
            .prompt
            .contains("No web research was available"));
    }

    #[tokio::test]
    async fn test_grounding_required_fails_when_every_search_fails() {
        let spec = Roster::default_pipeline()
            .get(&RoleId::new("architect"))
            .cloned()
            .unwrap()
            .with_grounding_required(true);
        let provider = ScriptedSearch::new(SearchScript::Fail(SearchErrorKind::Timeout));
        let (task, fx) = task_with_spec(spec, provider, ScriptedGenerator::new(), CancellationToken::new());

        let err = task.execute(&input(&["product_manager"]), true).await.unwrap_err();
        assert_eq!(err, RoleTaskError::GroundingUnavailable { attempted: 2 });
        assert!(fx.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_prior_output_is_invalid_input() {
        let (task, fx) = task_for("engineer", ScriptedSearch::always(1), ScriptedGenerator::new());

        let err = task.execute(&input(&["architect"]), true).await.unwrap_err();
        assert_eq!(
            err,
            RoleTaskError::InvalidInput {
                missing: vec!["project_manager".to_string()]
            }
        );
        // Nothing was searched for a stage that cannot run
        assert!(fx.log.entries_for(fx.session).is_empty());
    }

    #[tokio::test]
    async fn test_search_disabled_skips_queries() {
        let (task, fx) = task_for("product_manager", ScriptedSearch::always(3), ScriptedGenerator::new());

        task.execute(&input(&[]), false).await.unwrap();
        assert!(fx.log.entries_for(fx.session).is_empty());
        assert_eq!(fx.generator.requests()[0].grounding_count, 0);
    }

    #[tokio::test]
    async fn test_generation_failure_maps_to_generation_failed() {
        let generator = ScriptedGenerator::new().with_role("product_manager", GenScript::Fail("quota exceeded".into()));
        let (task, _fx) = task_for("product_manager", ScriptedSearch::always(1), generator);

        let err = task.execute(&input(&[]), true).await.unwrap_err();
        assert!(matches!(err, RoleTaskError::GenerationFailed(ref m) if m.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn test_cancel_during_generation() {
        let cancel = CancellationToken::new();
        let spec = Roster::default_pipeline()
            .get(&RoleId::new("product_manager"))
            .cloned()
            .unwrap();
        let generator = ScriptedGenerator::new().with_role("product_manager", GenScript::Hang);
        let (task, _fx) = task_with_spec(spec, ScriptedSearch::always(1), generator, cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let err = task.execute(&input(&[]), true).await.unwrap_err();
        assert_eq!(err, RoleTaskError::Cancelled);
        canceller.await.unwrap();
    }

    #[test]
    fn test_merge_hits_dedupes_by_url() {
        use crate::search::SearchResult;
        let hit = |url: &str| SearchHit {
            title: url.to_string(),
            snippet: String::new(),
            url: url.to_string(),
        };
        let ok = |hits| IssuedSearch {
            query: SearchQuery::new("q", RoleId::new("architect")),
            outcome: Ok(SearchResult::new(hits, Duration::ZERO)),
        };
        let outcomes = vec![ok(vec![hit("a"), hit("b")]), ok(vec![hit("b"), hit("c")])];
        let urls: Vec<_> = merge_hits(&outcomes).into_iter().map(|h| h.url).collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
    }
}
