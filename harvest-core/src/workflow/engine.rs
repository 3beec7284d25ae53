use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, DriverSurface};
use crate::config::TimeoutsSection;

use super::script;
use super::{
    Criticality, Locator, Settle, StepAction, StepResult, StepStatus, Workflow, WorkflowError,
    WorkflowStep,
};

#[derive(Debug, Clone)]
pub struct StepTimings {
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl From<&TimeoutsSection> for StepTimings {
    fn from(timeouts: &TimeoutsSection) -> Self {
        Self {
            ready_timeout: Duration::from_millis(timeouts.step_ready_ms),
            poll_interval: Duration::from_millis(timeouts.step_poll_interval_ms),
            settle_delay: Duration::from_millis(timeouts.settle_default_ms),
        }
    }
}

/// Executes the steps of a workflow strictly in order against one surface.
/// No branching, no per-step retry beyond each step's own bounded wait.
pub struct WorkflowEngine {
    timings: StepTimings,
    diagnostics_dir: Option<PathBuf>,
}

impl WorkflowEngine {
    pub fn new(timings: StepTimings) -> Self {
        Self {
            timings,
            diagnostics_dir: None,
        }
    }

    /// Capture a page snapshot here when a Required step fails.
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    pub async fn run(
        &self,
        surface: &mut dyn DriverSurface,
        workflow_name: &str,
        workflow: &Workflow,
        params: &HashMap<String, String>,
    ) -> Result<Vec<StepResult>, WorkflowError> {
        let mut results = Vec::with_capacity(workflow.steps.len());
        for (index, step) in workflow.steps.iter().enumerate() {
            let started = Instant::now();
            debug!(workflow = workflow_name, step = %step.name, index, "running step");
            match self.run_step(surface, step, params).await {
                Ok(()) => {
                    self.settle(surface, step).await?;
                    results.push(StepResult {
                        index,
                        name: step.name.clone(),
                        status: StepStatus::Completed,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(StepFault::NotReady { waited_ms }) => match step.criticality {
                    Criticality::Required => {
                        let snapshot = self
                            .capture_snapshot(surface, workflow_name, index)
                            .await;
                        return Err(WorkflowError::StepNotFound {
                            step_index: index,
                            name: step.name.clone(),
                            waited_ms,
                            snapshot,
                        });
                    }
                    Criticality::BestEffort => {
                        info!(
                            workflow = workflow_name,
                            step = %step.name,
                            waited_ms,
                            "best-effort step skipped: element never became ready"
                        );
                        results.push(StepResult {
                            index,
                            name: step.name.clone(),
                            status: StepStatus::Skipped {
                                reason: format!("element never became ready after {waited_ms}ms"),
                            },
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                },
                Err(StepFault::Vanished) => match step.criticality {
                    Criticality::Required => {
                        return Err(WorkflowError::Browser(BrowserError::Script(format!(
                            "element for step {index} ({}) vanished between readiness and action",
                            step.name
                        ))));
                    }
                    Criticality::BestEffort => {
                        results.push(StepResult {
                            index,
                            name: step.name.clone(),
                            status: StepStatus::Skipped {
                                reason: "element vanished before the action ran".to_string(),
                            },
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                },
                Err(StepFault::Browser(err)) => return Err(WorkflowError::Browser(err)),
            }
        }
        Ok(results)
    }

    async fn run_step(
        &self,
        surface: &mut dyn DriverSurface,
        step: &WorkflowStep,
        params: &HashMap<String, String>,
    ) -> Result<(), StepFault> {
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.timings.ready_timeout);
        let interval = step
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(self.timings.poll_interval);

        let waited = self
            .wait_until_ready(surface, &step.locator, timeout, interval)
            .await?;
        if let Some(waited_ms) = waited {
            return Err(StepFault::NotReady { waited_ms });
        }

        let act_script = match &step.action {
            StepAction::Click => script::click(&step.locator),
            StepAction::Input { value } => {
                script::input(&step.locator, &super::substitute_params(value, params))
            }
            StepAction::Press { key } => script::press(&step.locator, key),
        };
        let acted = surface
            .execute(&act_script)
            .await
            .map_err(StepFault::Browser)?
            .as_bool()
            .unwrap_or(false);
        if !acted {
            return Err(StepFault::Vanished);
        }
        Ok(())
    }

    /// Poll the readiness condition until it holds or the bound elapses.
    /// Returns `Some(waited_ms)` on timeout.
    async fn wait_until_ready(
        &self,
        surface: &mut dyn DriverSurface,
        locator: &Locator,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Option<u64>, StepFault> {
        let probe = script::readiness(locator);
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let ready = surface
                .execute(&probe)
                .await
                .map_err(StepFault::Browser)?
                .as_bool()
                .unwrap_or(false);
            if ready {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Ok(Some(started.elapsed().as_millis() as u64));
            }
            sleep(with_jitter(interval)).await;
        }
    }

    async fn settle(
        &self,
        surface: &mut dyn DriverSurface,
        step: &WorkflowStep,
    ) -> Result<(), WorkflowError> {
        match &step.settle {
            None => sleep(self.timings.settle_delay).await,
            Some(Settle::Delay { ms }) => sleep(Duration::from_millis(*ms)).await,
            Some(Settle::Probe {
                locator,
                timeout_ms,
            }) => {
                // A settle probe that never holds is not fatal by itself;
                // the next step's readiness wait is the real gate.
                if let Some(waited_ms) = self
                    .wait_until_ready(
                        surface,
                        locator,
                        Duration::from_millis(*timeout_ms),
                        self.timings.poll_interval,
                    )
                    .await
                    .map_err(|fault| match fault {
                        StepFault::Browser(err) => WorkflowError::Browser(err),
                        _ => WorkflowError::Browser(BrowserError::Unexpected(
                            "settle probe produced a non-browser fault".into(),
                        )),
                    })?
                {
                    debug!(step = %step.name, waited_ms, "settle probe never held");
                }
            }
        }
        Ok(())
    }

    async fn capture_snapshot(
        &self,
        surface: &mut dyn DriverSurface,
        workflow_name: &str,
        step_index: usize,
    ) -> Option<PathBuf> {
        let dir = self.diagnostics_dir.as_ref()?;
        let png = match surface.screenshot().await {
            Ok(png) => png,
            Err(err) => {
                warn!(error = %err, "failed to capture diagnostic snapshot");
                return None;
            }
        };
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(error = %err, "failed to create diagnostics dir");
            return None;
        }
        let path = dir.join(format!(
            "{workflow_name}-step{step_index}-{}.png",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        match std::fs::write(&path, png) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to write diagnostic snapshot");
                None
            }
        }
    }
}

enum StepFault {
    NotReady { waited_ms: u64 },
    Vanished,
    Browser(BrowserError),
}

/// Small random spread over the poll interval so concurrent jobs do not
/// probe in lockstep.
fn with_jitter(interval: Duration) -> Duration {
    let quarter = (interval.as_millis() as u64 / 4).max(1);
    interval + Duration::from_millis(rand::thread_rng().gen_range(0..quarter))
}
