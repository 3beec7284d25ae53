//! Workflow data model: a named, ordered sequence of UI steps that drives
//! a site to an export-triggered state. Steps are immutable data, loaded
//! from config or the built-in catalog, and interpreted uniformly by the
//! engine regardless of criticality.

pub mod catalog;
mod engine;
pub(crate) mod script;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{StepTimings, WorkflowEngine};

use crate::browser::BrowserError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Click,
    /// Value templates substitute `{param}` placeholders from job params.
    Input {
        value: String,
    },
    Press {
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    #[default]
    Required,
    BestEffort,
}

/// How the engine waits for the page to stabilize after acting. The target
/// re-renders asynchronously after most interactions, so the next locator
/// is only evaluated after the settle completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settle {
    Delay { ms: u64 },
    Probe { locator: Locator, timeout_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub locator: Locator,
    pub action: StepAction,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub settle: Option<Settle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Name of the `[site.*]` section whose session this workflow needs.
    pub site: String,
    #[serde(default)]
    pub start_url: Option<String>,
    /// When absent the workflow triggers no download and the job completes
    /// without an artifact.
    #[serde(default)]
    pub artifact_pattern: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn skipped(&self) -> bool {
        matches!(self.status, StepStatus::Skipped { .. })
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step {step_index} ({name}) never became ready after {waited_ms}ms")]
    StepNotFound {
        step_index: usize,
        name: String,
        waited_ms: u64,
        /// Diagnostic page snapshot captured for postmortem, when available.
        snapshot: Option<PathBuf>,
    },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Substitute `{param}` placeholders from the job's parameters. Unknown
/// placeholders are left verbatim.
pub(crate) fn substitute_params(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_params_and_keeps_unknown() {
        let mut params = HashMap::new();
        params.insert("search_text".to_string(), "pet supplies".to_string());
        assert_eq!(
            substitute_params("{search_text} / {max_rank}", &params),
            "pet supplies / {max_rank}"
        );
    }

    #[test]
    fn step_defaults_from_toml() {
        let step: WorkflowStep = toml::from_str(
            r##"
name = "export"
locator = { css = "#export" }
action = "click"
"##,
        )
        .expect("step should parse");
        assert_eq!(step.criticality, Criticality::Required);
        assert!(step.timeout_ms.is_none());
        assert!(step.settle.is_none());
    }

    #[test]
    fn settle_probe_from_toml() {
        let step: WorkflowStep = toml::from_str(
            r##"
name = "open-panel"
locator = { xpath = "//button[.//span[text()='Filters']]" }
action = "click"
settle = { probe = { locator = { css = ".panel" }, timeout_ms = 2000 } }
"##,
        )
        .expect("step should parse");
        assert!(matches!(
            step.settle,
            Some(Settle::Probe { ref locator, timeout_ms: 2000 }) if *locator == Locator::Css(".panel".into())
        ));
    }
}
