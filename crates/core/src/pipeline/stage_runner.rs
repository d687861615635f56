//! Runs one stage: brackets the role task with `stage_started` and a
//! terminal stage entry, enforces the stage time limit, and turns the
//! outcome into a `StageResult`.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::activity::{LogKind, SessionRecorder};
use crate::error::StageError;
use crate::generation::Generator;
use crate::roles::{RoleInput, RoleTask, StageSpec};
use crate::search::SearchClient;

use super::events::ProgressKind;
use super::session::{FailureReason, StageResult};

#[derive(Clone)]
pub struct StageRunner {
    recorder: SessionRecorder,
    search: SearchClient,
    generator: Arc<dyn Generator>,
    project_type: String,
}

impl StageRunner {
    pub fn new(
        recorder: SessionRecorder,
        search: SearchClient,
        generator: Arc<dyn Generator>,
        project_type: impl Into<String>,
    ) -> Self {
        Self {
            recorder,
            search,
            generator,
            project_type: project_type.into(),
        }
    }

    /// Run `spec` to a terminal result. Never panics on task failure; every
    /// failure becomes an unsuccessful `StageResult`.
    #[tracing::instrument(skip_all, fields(role = %spec.role, position = position + 1, total = total))]
    pub async fn run(
        &self,
        spec: &StageSpec,
        position: usize,
        total: usize,
        input: RoleInput,
        cancel: &CancellationToken,
    ) -> StageResult {
        let role = &spec.role;
        let started_at = Utc::now();
        let first_seq = self
            .recorder
            .record(
                role,
                LogKind::StageStarted,
                format!("{} (stage {} of {})", spec.title, position + 1, total),
                None,
                ProgressKind::StageStarted { role: role.clone() },
            )
            .await;

        let stage_cancel = cancel.child_token();
        let task = RoleTask::new(
            spec.clone(),
            self.search.clone(),
            Arc::clone(&self.generator),
            self.project_type.clone(),
            stage_cancel.clone(),
        );

        let execution = task.execute(&input, spec.allow_search);
        tokio::pin!(execution);
        let finished = tokio::select! {
            outcome = &mut execution => Some(outcome),
            _ = tokio::time::sleep(spec.timeout) => None,
        };
        let outcome = match finished {
            Some(outcome) => outcome.map_err(StageError::from),
            None => {
                // Let in-flight searches log their terminal entries first
                stage_cancel.cancel();
                let _ = execution.await;
                Err(StageError::Timeout { after: spec.timeout })
            }
        };

        let (output, error) = match outcome {
            Ok(output) => {
                tracing::info!(
                    grounding = output.grounding.len(),
                    failed_searches = output.searches_failed,
                    "Stage completed"
                );
                (Some(output.text), None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Stage failed");
                (None, Some(FailureReason::new(err.kind(), err.to_string())))
            }
        };

        let last_seq = match &error {
            None => {
                self.recorder
                    .record(
                        role,
                        LogKind::StageCompleted,
                        format!("{} finished", spec.title),
                        None,
                        ProgressKind::StageCompleted { role: role.clone() },
                    )
                    .await
            }
            Some(reason) => {
                self.recorder
                    .record(
                        role,
                        LogKind::StageFailed,
                        reason.to_string(),
                        None,
                        ProgressKind::StageFailed {
                            role: role.clone(),
                            error_kind: reason.kind,
                        },
                    )
                    .await
            }
        };

        let log_refs = self
            .recorder
            .snapshot()
            .between(first_seq, last_seq)
            .map(|e| e.sequence)
            .collect();

        StageResult {
            role: role.clone(),
            success: error.is_none(),
            output,
            queries: task.issued_queries(),
            log_refs,
            error,
            started_at,
            finished_at: Utc::now(),
            origin: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::error::FailureKind;
    use crate::pipeline::SessionId;
    use crate::roles::{RoleId, Roster};
    use crate::search::SearchSettings;
    use crate::test_support::{GenScript, ScriptedGenerator, ScriptedSearch, SearchScript};
    use std::time::Duration;

    fn runner(provider: ScriptedSearch, generator: ScriptedGenerator) -> (StageRunner, SessionRecorder) {
        let log = Arc::new(ActivityLog::new());
        let recorder = SessionRecorder::new(SessionId::new(), log, None);
        let search = SearchClient::new(Arc::new(provider), recorder.clone(), SearchSettings::default());
        (
            StageRunner::new(recorder.clone(), search, Arc::new(generator), "static_site"),
            recorder,
        )
    }

    fn product_manager() -> StageSpec {
        Roster::default_pipeline()
            .get(&RoleId::new("product_manager"))
            .cloned()
            .unwrap()
    }

    fn input() -> RoleInput {
        RoleInput {
            request: "todo list".to_string(),
            prior: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_success_brackets_searches() {
        let (runner, recorder) = runner(ScriptedSearch::always(1), ScriptedGenerator::new());

        let result = runner
            .run(&product_manager(), 0, 6, input(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.output.is_some());
        assert_eq!(result.queries.len(), 2);

        let entries = recorder.snapshot().to_vec();
        assert_eq!(entries.first().unwrap().kind, LogKind::StageStarted);
        assert_eq!(entries.last().unwrap().kind, LogKind::StageCompleted);
        assert_eq!(result.log_refs, entries.iter().map(|e| e.sequence).collect::<Vec<_>>());
        assert_eq!(result.log_refs.len(), 6);
    }

    #[tokio::test]
    async fn test_timeout_cancels_searches_and_fails_stage() {
        let spec = product_manager().with_timeout(Duration::from_millis(50));
        let (runner, recorder) = runner(ScriptedSearch::new(SearchScript::Hang), ScriptedGenerator::new());

        let result = runner.run(&spec, 0, 6, input(), &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error.as_ref().unwrap().kind, FailureKind::StageTimeout);

        let entries = recorder.snapshot().to_vec();
        let started = entries.iter().filter(|e| e.kind == LogKind::SearchStarted).count();
        let terminal = entries.iter().filter(|e| e.kind.is_search_terminal()).count();
        assert_eq!(started, 2);
        assert_eq!(terminal, 2);
        assert_eq!(entries.last().unwrap().kind, LogKind::StageFailed);
    }

    #[tokio::test]
    async fn test_slow_generation_times_out() {
        let spec = product_manager().with_timeout(Duration::from_millis(50));
        let generator = ScriptedGenerator::new().with_role("product_manager", GenScript::Hang);
        let (runner, _recorder) = runner(ScriptedSearch::always(1), generator);

        let result = runner.run(&spec, 0, 6, input(), &CancellationToken::new()).await;
        assert_eq!(result.error.unwrap().kind, FailureKind::StageTimeout);
    }

    #[tokio::test]
    async fn test_parent_cancellation_reports_cancelled() {
        let cancel = CancellationToken::new();
        let generator = ScriptedGenerator::new().with_role("product_manager", GenScript::Hang);
        let (runner, _recorder) = runner(ScriptedSearch::always(1), generator);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = runner.run(&product_manager(), 0, 6, input(), &cancel).await;
        assert_eq!(result.error.unwrap().kind, FailureKind::Cancelled);
    }
}
