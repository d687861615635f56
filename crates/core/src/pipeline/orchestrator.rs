//! # Pipeline Orchestrator
//!
//! Drives a session through every stage of the roster in order, then hands
//! the accumulated artifacts to the deployment builder. The first stage
//! failure ends the session; there is no retry inside a session.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityLog, SessionRecorder};
use crate::config::PipelineConfig;
use crate::deploy::{ArtifactSet, BuilderRegistry, DeploymentBuilder};
use crate::error::{ConfigError, FailureKind, ResumeError};
use crate::generation::{Generator, OpenAiCompatGenerator};
use crate::roles::{RoleInput, Roster};
use crate::search::{provider_from_config, SearchClient, SearchProvider, SearchSettings};

use super::events::{ProgressEvent, ProgressKind};
use super::session::{FailedAt, FailureReason, ProjectRequest, Session, TransitionError};
use super::stage_runner::StageRunner;
use super::summary::SessionSummary;

/// Project type used when none is configured
pub const DEFAULT_PROJECT_TYPE: &str = "static_site";

/// Runs sessions. Cheap to clone; clones share the activity log.
#[derive(Clone)]
pub struct Orchestrator {
    roster: Arc<Roster>,
    log: Arc<ActivityLog>,
    search: Arc<dyn SearchProvider>,
    search_settings: SearchSettings,
    generator: Arc<dyn Generator>,
    deployer: Arc<dyn DeploymentBuilder>,
    project_type: String,
    event_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl Orchestrator {
    pub fn new(
        roster: Roster,
        search: Arc<dyn SearchProvider>,
        generator: Arc<dyn Generator>,
        deployer: Arc<dyn DeploymentBuilder>,
    ) -> Self {
        Self {
            roster: Arc::new(roster),
            log: Arc::new(ActivityLog::new()),
            search,
            search_settings: SearchSettings::default(),
            generator,
            deployer,
            project_type: DEFAULT_PROJECT_TYPE.to_string(),
            event_tx: None,
        }
    }

    /// Wire the production collaborators described by `config`
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let roster = Roster::from_config(config)?;
        let search = provider_from_config(&config.search)?;

        let mut generator = OpenAiCompatGenerator::new(config.global_model_config());
        for spec in roster.stages() {
            generator = generator.with_role_model(spec.role.clone(), config.model_config(spec.role.as_str()));
        }

        let deployer = BuilderRegistry::with_static_site(&config.output_dir);

        Ok(Self::new(roster, search, Arc::new(generator), Arc::new(deployer))
            .with_search_settings(config.search.settings())
            .with_project_type(&config.project_type))
    }

    /// Share an existing log, e.g. between several orchestrators
    pub fn with_log(mut self, log: Arc<ActivityLog>) -> Self {
        self.log = log;
        self
    }

    /// Set event channel for streaming progress
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.search_settings = settings;
        self
    }

    pub fn with_project_type(mut self, project_type: impl Into<String>) -> Self {
        self.project_type = project_type.into();
        self
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    /// Drive a new session to a terminal state
    pub async fn run(&self, request: ProjectRequest) -> Session {
        self.run_with_cancellation(request, CancellationToken::new()).await
    }

    /// Like `run`, stopping with `Cancelled` once `cancel` fires
    #[tracing::instrument(skip_all, fields(session = tracing::field::Empty))]
    pub async fn run_with_cancellation(&self, request: ProjectRequest, cancel: CancellationToken) -> Session {
        let mut session = Session::new(request);
        tracing::Span::current().record("session", tracing::field::display(session.id));
        tracing::info!(session = %session.id, stages = self.roster.len(), "Session started");
        self.drive_to_end(&mut session, &cancel).await;
        session
    }

    /// Continue a failed session in a new one.
    ///
    /// Successful results up to the failure are carried over; execution
    /// restarts at the failed stage, or at deployment if every stage had
    /// succeeded.
    #[tracing::instrument(skip_all, fields(session = tracing::field::Empty, resumed_from = %previous.id))]
    pub async fn resume(&self, previous: &Session, cancel: CancellationToken) -> Result<Session, ResumeError> {
        if previous.failure().is_none() {
            return Err(ResumeError::NotFailed(previous.state.label()));
        }

        let carried: Vec<_> = previous
            .results()
            .iter()
            .take_while(|r| r.success)
            .take(self.roster.len())
            .cloned()
            .collect();
        for (index, (result, spec)) in carried.iter().zip(self.roster.stages()).enumerate() {
            if result.role != spec.role {
                return Err(ResumeError::RosterMismatch {
                    index,
                    expected: spec.role.to_string(),
                    found: result.role.to_string(),
                });
            }
        }

        let mut session = Session::resumed(previous, carried);
        tracing::Span::current().record("session", tracing::field::display(session.id));
        tracing::info!(
            session = %session.id,
            resumed_from = %previous.id,
            carried = session.results().len(),
            "Session resumed"
        );
        self.drive_to_end(&mut session, &cancel).await;
        Ok(session)
    }

    /// Read-only view of a session and its log, including the entries of
    /// results carried over from earlier sessions in this log
    pub fn summarize(&self, session: &Session) -> SessionSummary {
        let origins: HashMap<_, _> = SessionSummary::origins_of(session)
            .into_iter()
            .map(|id| (id, self.log.entries_for(id)))
            .collect();
        SessionSummary::build_with_origins(session, &self.log.entries_for(session.id), &origins)
    }

    async fn drive_to_end(&self, session: &mut Session, cancel: &CancellationToken) {
        let recorder = SessionRecorder::new(session.id, Arc::clone(&self.log), self.event_tx.clone());
        if let Err(err) = self.drive(session, &recorder, cancel).await {
            // Only reachable through a bug in the stage loop
            tracing::error!(session = %session.id, error = %err, "Session state machine rejected a transition");
        }
        match &session.state {
            state if state.is_terminal() => {
                tracing::info!(session = %session.id, state = state.label(), "Session finished")
            }
            state => tracing::error!(session = %session.id, state = state.label(), "Session stopped early"),
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        recorder: &SessionRecorder,
        cancel: &CancellationToken,
    ) -> Result<(), TransitionError> {
        let search = SearchClient::new(Arc::clone(&self.search), recorder.clone(), self.search_settings.clone());
        let runner = StageRunner::new(
            recorder.clone(),
            search,
            Arc::clone(&self.generator),
            self.project_type.clone(),
        );
        let total = self.roster.len();
        let start = session.results().len();

        for (index, spec) in self.roster.stages().iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                let at = FailedAt::Stage {
                    index,
                    role: spec.role.clone(),
                };
                let reason = FailureReason::new(FailureKind::Cancelled, "session cancelled before the stage started");
                session.fail(at, reason)?;
                announce_failure(recorder, session).await;
                return Ok(());
            }

            session.enter_stage(index, &spec.role)?;
            let input = RoleInput::assemble(session.request.as_str(), spec, session.results());
            let result = runner.run(spec, index, total, input, cancel).await;
            session.commit(result)?;

            if session.is_terminal() {
                announce_failure(recorder, session).await;
                return Ok(());
            }
        }

        if cancel.is_cancelled() {
            let reason = FailureReason::new(FailureKind::Cancelled, "session cancelled before deployment");
            session.fail(FailedAt::Deploying, reason)?;
            announce_failure(recorder, session).await;
            return Ok(());
        }

        session.enter_deploying(total)?;
        let artifacts = ArtifactSet::from_results(session.id, session.request.as_str(), session.results());
        tracing::info!(files = artifacts.files.len(), project_type = %self.project_type, "Deploying");

        let built = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::new(FailureKind::Cancelled, "session cancelled during deployment")),
            built = self.deployer.build(&artifacts, &self.project_type) => {
                built.map_err(|e| FailureReason::new(e.kind(), e.to_string()))
            }
        };

        match built {
            Ok(package) => {
                let package_ref = package.package_ref.clone();
                session.complete(package)?;
                recorder.emit(ProgressKind::SessionCompleted { package_ref }).await;
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Deployment failed");
                session.fail(FailedAt::Deploying, reason)?;
                announce_failure(recorder, session).await;
            }
        }
        Ok(())
    }
}

/// Emit `session_failed`, naming the failing stage and the kind verbatim
async fn announce_failure(recorder: &SessionRecorder, session: &Session) {
    if let Some((at, reason)) = session.failure() {
        recorder
            .emit(ProgressKind::SessionFailed {
                stage: at.to_string(),
                kind: reason.kind,
                reason: format!("{}: {}", at, reason),
            })
            .await;
    }
}
