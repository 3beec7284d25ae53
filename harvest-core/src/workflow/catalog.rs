//! Built-in workflow definitions. Config entries with the same name shadow
//! these; they exist so a bare deployment can run the known export flows
//! without writing step tables by hand.

use super::{Criticality, Locator, Settle, StepAction, Workflow, WorkflowStep};

pub fn builtin(name: &str) -> Option<Workflow> {
    match name {
        "niche-finder-export" => Some(niche_finder_export()),
        "category-and-simple-click" => Some(category_and_simple_click()),
        _ => None,
    }
}

/// Niche Finder CSV export: open the subcategories grid, apply the
/// subcategory filter, then fire the two-stage export (grid side panel,
/// then the CSV icon). The long settles match how slowly the grid
/// re-renders after each interaction.
fn niche_finder_export() -> Workflow {
    Workflow {
        site: "smartscout".to_string(),
        start_url: Some("https://app.smartscout.com/app/subcategories".to_string()),
        artifact_pattern: Some(r".*\.csv$".to_string()),
        steps: vec![
            WorkflowStep {
                name: "niche-finder-tab".to_string(),
                locator: Locator::Xpath(
                    "//div[contains(@class, 'mat-tab-label-content') and contains(., 'Niche Finder')]"
                        .to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 10_000 }),
            },
            WorkflowStep {
                name: "open-filters".to_string(),
                locator: Locator::Xpath("//button[.//span[text()='Filters']]".to_string()),
                action: StepAction::Click,
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 10_000 }),
            },
            WorkflowStep {
                name: "expand-subcategory-group".to_string(),
                locator: Locator::Xpath(
                    "//div[.//span[text()='Subcategory'] and contains(@class, 'ag-group-title-bar')]"
                        .to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                settle: Some(Settle::Probe {
                    locator: Locator::Xpath(
                        "//input[contains(@class, 'ag-input-field-input') and @placeholder='Filter...']"
                            .to_string(),
                    ),
                    timeout_ms: 10_000,
                }),
            },
            WorkflowStep {
                name: "subcategory-filter".to_string(),
                locator: Locator::Xpath(
                    "//input[contains(@class, 'ag-input-field-input') and @placeholder='Filter...']"
                        .to_string(),
                ),
                action: StepAction::Input {
                    value: "{search_text}".to_string(),
                },
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 3_000 }),
            },
            WorkflowStep {
                name: "excel-side-panel".to_string(),
                locator: Locator::Xpath(
                    "//button[contains(@class, 'ag-side-button-button') and .//img[contains(@src, 'excel')]]"
                        .to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 5_000 }),
            },
            WorkflowStep {
                name: "export-csv".to_string(),
                locator: Locator::Xpath(
                    "//img[contains(@src, 'csv.ico') and @mattooltip='Export as CSV']".to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::Required,
                timeout_ms: None,
                poll_interval_ms: None,
                // The download itself is the artifact lifecycle's problem;
                // this settle only covers the in-page export spinner.
                settle: Some(Settle::Delay { ms: 5_000 }),
            },
        ],
    }
}

/// Two optional navigation clicks on the category screen. Neither click is
/// load-bearing, so both are best-effort and the workflow produces no
/// artifact.
fn category_and_simple_click() -> Workflow {
    Workflow {
        site: "kalodata".to_string(),
        start_url: None,
        artifact_pattern: None,
        steps: vec![
            WorkflowStep {
                name: "category".to_string(),
                locator: Locator::Xpath(
                    "//div[contains(text(),'Category') or contains(.,'Category')]".to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::BestEffort,
                timeout_ms: Some(20_000),
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 10_000 }),
            },
            WorkflowStep {
                name: "simple".to_string(),
                locator: Locator::Xpath(
                    "//div[contains(translate(text(), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), 'simple')]"
                        .to_string(),
                ),
                action: StepAction::Click,
                criticality: Criticality::BestEffort,
                timeout_ms: Some(20_000),
                poll_interval_ms: None,
                settle: Some(Settle::Delay { ms: 500 }),
            },
        ],
    }
}
