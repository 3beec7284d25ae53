use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::workflow::{catalog, Locator, Workflow};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarvestConfig {
    pub paths: PathsSection,
    pub limits: LimitsSection,
    pub browser: BrowserSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default, rename = "site")]
    pub sites: HashMap<String, SiteSection>,
    #[serde(default, rename = "workflow")]
    pub workflows: HashMap<String, Workflow>,
}

impl HarvestConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.work_dir)
    }

    pub fn session_db(&self) -> PathBuf {
        self.resolve_path(&self.paths.session_db)
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.diagnostics_dir)
    }

    /// Look up a workflow by name; configured workflows shadow built-ins.
    pub fn workflow(&self, name: &str) -> Option<Workflow> {
        self.workflows
            .get(name)
            .cloned()
            .or_else(|| catalog::builtin(name))
    }

    pub fn site(&self, name: &str) -> Option<&SiteSection> {
        self.sites.get(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub session_db: String,
    pub diagnostics_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub max_browser_instances: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default)]
    pub executable_path: Option<String>,
    pub headless: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_true")]
    pub disable_gpu: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// All waits are bounded; these are the process-wide defaults, overridable
/// per workflow step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub marker_probe_ms: u64,
    pub probe_interval_ms: u64,
    pub login_redirect_ms: u64,
    pub login_poll_interval_ms: u64,
    pub step_ready_ms: u64,
    pub step_poll_interval_ms: u64,
    pub settle_default_ms: u64,
    pub artifact_settle_ms: u64,
    pub artifact_retry_ms: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            marker_probe_ms: 10_000,
            probe_interval_ms: 500,
            login_redirect_ms: 30_000,
            login_poll_interval_ms: 1_000,
            step_ready_ms: 25_000,
            step_poll_interval_ms: 500,
            settle_default_ms: 3_000,
            artifact_settle_ms: 5_000,
            artifact_retry_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSection {
    pub domain: String,
    pub dashboard_url: String,
    pub login_url: String,
    /// Path fragment that identifies the login page in the current URL.
    pub login_path: String,
    pub identity_locator: Locator,
    pub secret_locator: Locator,
    pub submit_locator: Locator,
    /// Appears only when authenticated; probed after restore and after login.
    pub marker_locator: Locator,
    #[serde(default)]
    pub pool_capacity: Option<usize>,
}

fn default_true() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    parse_config(path.as_ref())
}

fn parse_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Criticality, StepAction};

    const SAMPLE: &str = r##"
[paths]
base_dir = "/var/lib/harvest"
work_dir = "work"
session_db = "data/sessions.sqlite"
diagnostics_dir = "diagnostics"

[limits]
max_browser_instances = 3

[browser]
headless = true

[timeouts]
step_ready_ms = 20000

[site.smartscout]
domain = "app.smartscout.com"
dashboard_url = "https://app.smartscout.com/app/home"
login_url = "https://app.smartscout.com/sessions/signin"
login_path = "/sessions/signin"
identity_locator = { css = "#username" }
secret_locator = { css = "#password" }
submit_locator = { css = "button[type='submit']" }
marker_locator = { xpath = "//*[contains(text(), 'Dashboard')]" }
pool_capacity = 2

[workflow.filter-export]
site = "smartscout"
start_url = "https://app.smartscout.com/app/subcategories"
artifact_pattern = '.*\.csv$'

[[workflow.filter-export.steps]]
name = "filter-input"
locator = { css = "input.filter" }
action = { input = { value = "{search_text}" } }

[[workflow.filter-export.steps]]
name = "export"
locator = { css = "#export" }
action = "click"
criticality = "best_effort"
settle = { delay = { ms = 1500 } }
"##;

    #[test]
    fn parses_full_config() {
        let config: HarvestConfig = toml::from_str(SAMPLE).expect("config should parse");
        assert_eq!(config.limits.max_browser_instances, 3);
        assert_eq!(config.timeouts.step_ready_ms, 20_000);
        // Unset timeout fields fall back to defaults.
        assert_eq!(config.timeouts.artifact_settle_ms, 5_000);

        let site = config.site("smartscout").expect("site present");
        assert_eq!(site.pool_capacity, Some(2));
        assert!(matches!(site.identity_locator, Locator::Css(ref s) if s == "#username"));
        assert!(matches!(site.marker_locator, Locator::Xpath(_)));

        let workflow = config.workflow("filter-export").expect("workflow present");
        assert_eq!(workflow.site, "smartscout");
        assert_eq!(workflow.steps.len(), 2);
        assert!(matches!(
            workflow.steps[0].action,
            StepAction::Input { ref value } if value == "{search_text}"
        ));
        assert_eq!(workflow.steps[0].criticality, Criticality::Required);
        assert_eq!(workflow.steps[1].criticality, Criticality::BestEffort);
    }

    #[test]
    fn resolves_relative_paths_against_base_dir() {
        let config: HarvestConfig = toml::from_str(SAMPLE).expect("config should parse");
        assert_eq!(
            config.session_db(),
            PathBuf::from("/var/lib/harvest/data/sessions.sqlite")
        );
        assert_eq!(config.resolve_path("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn builtin_workflows_available_without_config_entries() {
        let config: HarvestConfig = toml::from_str(SAMPLE).expect("config should parse");
        assert!(config.workflow("niche-finder-export").is_some());
        assert!(config.workflow("category-and-simple-click").is_some());
        assert!(config.workflow("does-not-exist").is_none());
    }
}
