use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use harvest_core::browser::{BrowserResult, DriverSurface, SessionCookie};
use harvest_core::workflow::{
    Criticality, Locator, Settle, StepAction, StepTimings, Workflow, WorkflowEngine, WorkflowError,
    WorkflowStep,
};

/// A page where a fixed set of selectors is ready. Actions are recorded so
/// tests can assert what ran and in which order.
struct MockSurface {
    ready: HashSet<String>,
    vanishing: HashSet<String>,
    actions: Vec<String>,
}

impl MockSurface {
    fn with_ready(selectors: &[&str]) -> Self {
        Self {
            ready: selectors.iter().map(|s| s.to_string()).collect(),
            vanishing: HashSet::new(),
            actions: Vec::new(),
        }
    }

    fn matched_selector(&self, script: &str) -> Option<&str> {
        self.ready
            .iter()
            .chain(self.vanishing.iter())
            .map(String::as_str)
            .find(|selector| script.contains(selector))
    }
}

#[async_trait]
impl DriverSurface for MockSurface {
    async fn navigate(&mut self, _url: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok("https://app.example.com/grid".to_string())
    }

    async fn execute(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        let selector = self.matched_selector(script).map(str::to_string);
        if script.contains("getClientRects") {
            let ready = selector.map(|s| self.ready.contains(&s)).unwrap_or(false);
            return Ok(serde_json::Value::Bool(ready));
        }
        self.actions.push(script.to_string());
        let acted = selector
            .map(|s| self.ready.contains(&s) && !self.vanishing.contains(&s))
            .unwrap_or(false);
        Ok(serde_json::Value::Bool(acted))
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        Ok(Vec::new())
    }

    async fn inject_cookies(&mut self, _cookies: &[SessionCookie]) -> BrowserResult<()> {
        Ok(())
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn close(&mut self) {}
}

fn fast_timings() -> StepTimings {
    StepTimings {
        ready_timeout: Duration::from_millis(60),
        poll_interval: Duration::from_millis(10),
        settle_delay: Duration::from_millis(5),
    }
}

fn step(name: &str, selector: &str, action: StepAction) -> WorkflowStep {
    WorkflowStep {
        name: name.to_string(),
        locator: Locator::Css(selector.to_string()),
        action,
        criticality: Criticality::Required,
        timeout_ms: None,
        poll_interval_ms: None,
        settle: Some(Settle::Delay { ms: 1 }),
    }
}

fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
    Workflow {
        site: "example".to_string(),
        start_url: None,
        artifact_pattern: Some(r".*\.csv$".to_string()),
        steps,
    }
}

#[tokio::test]
async fn steps_run_in_order_and_all_complete() {
    let mut surface = MockSurface::with_ready(&["#open-filters", "#filter-input", "#export-csv"]);
    let engine = WorkflowEngine::new(fast_timings());
    let flow = workflow(vec![
        step("open-filters", "#open-filters", StepAction::Click),
        step(
            "filter-input",
            "#filter-input",
            StepAction::Input {
                value: "widgets".to_string(),
            },
        ),
        step("export", "#export-csv", StepAction::Click),
    ]);

    let results = engine
        .run(&mut surface, "grid-export", &flow, &HashMap::new())
        .await
        .expect("workflow completes");

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| !r.skipped()));
    assert!(surface.actions[0].contains("#open-filters"));
    assert!(surface.actions[1].contains("#filter-input"));
    assert!(surface.actions[2].contains("#export-csv"));
}

#[tokio::test]
async fn input_values_substitute_job_params() {
    let mut surface = MockSurface::with_ready(&["#filter-input"]);
    let engine = WorkflowEngine::new(fast_timings());
    let flow = workflow(vec![step(
        "filter-input",
        "#filter-input",
        StepAction::Input {
            value: "{search_text}".to_string(),
        },
    )]);
    let params = HashMap::from([("search_text".to_string(), "Garden Hoses".to_string())]);

    engine
        .run(&mut surface, "grid-export", &flow, &params)
        .await
        .expect("workflow completes");

    assert!(surface.actions[0].contains("Garden Hoses"));
    assert!(!surface.actions[0].contains("{search_text}"));
}

#[tokio::test]
async fn required_step_that_never_appears_fails_with_its_position() {
    let mut surface = MockSurface::with_ready(&["#open-filters"]);
    let engine = WorkflowEngine::new(fast_timings());
    let flow = workflow(vec![
        step("open-filters", "#open-filters", StepAction::Click),
        step("missing", "#never-renders", StepAction::Click),
        step("export", "#export-csv", StepAction::Click),
    ]);

    let err = engine
        .run(&mut surface, "grid-export", &flow, &HashMap::new())
        .await
        .expect_err("second step fails");

    match err {
        WorkflowError::StepNotFound {
            step_index,
            name,
            waited_ms,
            ..
        } => {
            assert_eq!(step_index, 1);
            assert_eq!(name, "missing");
            assert!(waited_ms >= 60);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The failing step must stop the run before the export click.
    assert!(surface.actions.iter().all(|s| !s.contains("#export-csv")));
}

#[tokio::test]
async fn best_effort_step_is_skipped_and_the_run_continues() {
    let mut surface = MockSurface::with_ready(&["#export-csv"]);
    let engine = WorkflowEngine::new(fast_timings());
    let mut optional = step("banner-dismiss", "#banner", StepAction::Click);
    optional.criticality = Criticality::BestEffort;
    optional.timeout_ms = Some(20);
    let flow = workflow(vec![optional, step("export", "#export-csv", StepAction::Click)]);

    let results = engine
        .run(&mut surface, "grid-export", &flow, &HashMap::new())
        .await
        .expect("workflow completes");

    assert!(results[0].skipped());
    assert!(!results[1].skipped());
    assert!(surface.actions.iter().any(|s| s.contains("#export-csv")));
}

#[tokio::test]
async fn element_vanishing_mid_step_fails_required_steps() {
    let mut surface = MockSurface::with_ready(&["#flaky"]);
    surface.vanishing.insert("#flaky".to_string());
    let engine = WorkflowEngine::new(fast_timings());
    let flow = workflow(vec![step("flaky", "#flaky", StepAction::Click)]);

    let err = engine
        .run(&mut surface, "grid-export", &flow, &HashMap::new())
        .await
        .expect_err("vanished element fails the step");
    assert!(matches!(err, WorkflowError::Browser(_)));
}

#[tokio::test]
async fn element_vanishing_mid_step_skips_best_effort_steps() {
    let mut surface = MockSurface::with_ready(&["#flaky"]);
    surface.vanishing.insert("#flaky".to_string());
    let engine = WorkflowEngine::new(fast_timings());
    let mut flaky = step("flaky", "#flaky", StepAction::Click);
    flaky.criticality = Criticality::BestEffort;
    let flow = workflow(vec![flaky]);

    let results = engine
        .run(&mut surface, "grid-export", &flow, &HashMap::new())
        .await
        .expect("workflow completes");
    assert!(results[0].skipped());
}
