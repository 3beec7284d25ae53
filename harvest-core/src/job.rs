//! The job pipeline: admission, session, workflow, artifact, cleanup.
//! A job either completes with an outcome or fails with the first fatal
//! error; best-effort phases downgrade to warnings on the outcome.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactError, ArtifactLifecycle, ArtifactSink};
use crate::browser::{BrowserError, OpenOptions, SurfaceFactory};
use crate::config::HarvestConfig;
use crate::gate::GateRegistry;
use crate::session::{Credentials, SessionError, SessionManager, SqliteSessionStore, StoreError};
use crate::workflow::{StepResult, WorkflowEngine, WorkflowError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown workflow: {name}")]
    UnknownWorkflow { name: String },
    #[error("workflow {workflow} references unknown site: {site}")]
    UnknownSite { workflow: String, site: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JobResult<T> = std::result::Result<T, JobError>;

/// Where a job is in its pipeline. Transitions are strictly forward and
/// logged; there is no mid-flight cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    AcquiringSession,
    Authenticated,
    RunningWorkflow,
    AwaitingArtifact,
    Verifying,
    Dispatching,
    CleaningUp,
    Completed,
    Failed,
}

fn enter(job_id: Uuid, state: JobState) {
    tracing::debug!(job = %job_id, state = ?state, "job state");
}

/// One export request: a workflow name plus its parameters, and the
/// credentials to use if no persisted session restores.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub workflow: String,
    pub params: HashMap<String, String>,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub workflow: String,
    pub restored_session: bool,
    pub steps: Vec<StepResult>,
    pub artifact_name: Option<String>,
    pub artifact_size: Option<u64>,
    /// Artifact bytes, kept in memory for the caller after the file on
    /// disk is gone. Absent for artifact-less workflows.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
    /// Whether the sink accepted the artifact. Absent when there was no
    /// artifact or no sink configured.
    pub dispatched: Option<bool>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// Runs jobs end to end. Holds the per-site gates, the session manager,
/// and the artifact lifecycle; one instance serves the whole process.
pub struct Harvester {
    config: Arc<HarvestConfig>,
    sessions: SessionManager,
    engine: WorkflowEngine,
    artifacts: ArtifactLifecycle,
    gates: GateRegistry,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl Harvester {
    pub fn new(config: Arc<HarvestConfig>, factory: Arc<dyn SurfaceFactory>) -> JobResult<Self> {
        let store = SqliteSessionStore::new(config.session_db());
        if let Some(parent) = config.session_db().parent() {
            std::fs::create_dir_all(parent)?;
        }
        store.initialize()?;
        let sessions = SessionManager::new(factory, store, config.timeouts.clone());
        let engine = WorkflowEngine::new((&config.timeouts).into())
            .with_diagnostics_dir(config.diagnostics_dir());
        let artifacts = ArtifactLifecycle::from(&config.timeouts);
        let gates = GateRegistry::new(config.limits.max_browser_instances);
        Ok(Self {
            config,
            sessions,
            engine,
            artifacts,
            gates,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Runs one job to completion. Blocks on the site's gate, so callers
    /// can submit freely and admission order decides who runs.
    pub async fn submit(&self, request: JobRequest) -> JobResult<JobOutcome> {
        let job_id = Uuid::new_v4();
        let started = Instant::now();
        enter(job_id, JobState::Queued);

        let workflow =
            self.config
                .workflow(&request.workflow)
                .ok_or_else(|| JobError::UnknownWorkflow {
                    name: request.workflow.clone(),
                })?;
        let site = self
            .config
            .site(&workflow.site)
            .ok_or_else(|| JobError::UnknownSite {
                workflow: request.workflow.clone(),
                site: workflow.site.clone(),
            })?;

        let gate = self.gates.gate(&workflow.site, site.pool_capacity).await;
        let _slot = gate.admit().await;
        info!(job = %job_id, workflow = %request.workflow, site = %workflow.site, "job admitted");

        let job_dir = self.config.work_dir().join("jobs").join(job_id.to_string());
        let download_dir = job_dir.join("downloads");
        std::fs::create_dir_all(&download_dir)?;

        let result = self
            .run_admitted(job_id, &request, &workflow, site, &download_dir, started)
            .await;

        // The job directory goes away whatever happened; artifacts the
        // caller keeps live in the outcome's bytes.
        if let Err(err) = std::fs::remove_dir_all(&job_dir) {
            warn!(job = %job_id, dir = %job_dir.display(), error = %err, "failed to remove job dir");
        }

        match &result {
            Ok(outcome) => {
                enter(job_id, JobState::Completed);
                info!(
                    job = %job_id,
                    workflow = %request.workflow,
                    duration_ms = outcome.duration_ms,
                    warnings = outcome.warnings.len(),
                    "job completed"
                );
            }
            Err(err) => {
                enter(job_id, JobState::Failed);
                warn!(job = %job_id, workflow = %request.workflow, error = %err, "job failed");
            }
        }
        result
    }

    async fn run_admitted(
        &self,
        job_id: Uuid,
        request: &JobRequest,
        workflow: &crate::workflow::Workflow,
        site: &crate::config::SiteSection,
        download_dir: &Path,
        started: Instant,
    ) -> JobResult<JobOutcome> {
        let options = OpenOptions {
            headless: None,
            download_dir: Some(download_dir.to_path_buf()),
        };
        enter(job_id, JobState::AcquiringSession);
        let mut session = self
            .sessions
            .acquire(site, request.credentials.as_ref(), options)
            .await?;
        enter(job_id, JobState::Authenticated);

        let run = self
            .run_authenticated(job_id, request, workflow, download_dir, &mut session)
            .await;

        // The surface closes on every path; a leaked browser outlives the
        // job and silently eats a gate slot's worth of memory.
        session.surface.close().await;

        let (steps, artifact, warnings) = run?;

        let (artifact_name, artifact_size, bytes, dispatched) = match artifact {
            Some((artifact, bytes, dispatched)) => (
                Some(artifact.name),
                Some(artifact.size),
                Some(bytes),
                dispatched,
            ),
            None => (None, None, None, None),
        };

        Ok(JobOutcome {
            job_id,
            workflow: request.workflow.clone(),
            restored_session: session.restored,
            steps,
            artifact_name,
            artifact_size,
            bytes,
            dispatched,
            warnings,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    #[allow(clippy::type_complexity)]
    async fn run_authenticated(
        &self,
        job_id: Uuid,
        request: &JobRequest,
        workflow: &crate::workflow::Workflow,
        download_dir: &Path,
        session: &mut crate::session::AuthenticatedSurface,
    ) -> JobResult<(
        Vec<StepResult>,
        Option<(crate::artifact::Artifact, Vec<u8>, Option<bool>)>,
        Vec<String>,
    )> {
        let mut warnings = Vec::new();

        if let Some(start_url) = &workflow.start_url {
            session.surface.navigate(start_url).await?;
        }

        enter(job_id, JobState::RunningWorkflow);
        let steps = self
            .engine
            .run(
                session.surface.as_mut(),
                &request.workflow,
                workflow,
                &request.params,
            )
            .await?;
        for step in steps.iter().filter(|step| step.skipped()) {
            warnings.push(format!("step {} ({}) skipped", step.index, step.name));
        }

        let artifact = match &workflow.artifact_pattern {
            None => None,
            Some(pattern) => {
                enter(job_id, JobState::AwaitingArtifact);
                let mut artifact = self.artifacts.resolve(download_dir, pattern).await?;
                enter(job_id, JobState::Verifying);
                self.artifacts.verify(&mut artifact)?;
                let bytes = self.artifacts.read(&artifact).await?;

                let dispatched = match &self.sink {
                    Some(sink) => {
                        enter(job_id, JobState::Dispatching);
                        let ok = self
                            .artifacts
                            .dispatch(&mut artifact, &bytes, sink.as_ref())
                            .await;
                        if !ok {
                            warnings.push(format!("dispatch of {} failed", artifact.name));
                        }
                        Some(ok)
                    }
                    None => None,
                };
                enter(job_id, JobState::CleaningUp);
                if !self.artifacts.cleanup(&mut artifact).await {
                    warnings.push(format!("cleanup of {} failed", artifact.name));
                }
                info!(
                    job = %job_id,
                    artifact = %artifact.name,
                    size = artifact.size,
                    "artifact harvested"
                );
                Some((artifact, bytes, dispatched))
            }
        };

        Ok((steps, artifact, warnings))
    }
}
