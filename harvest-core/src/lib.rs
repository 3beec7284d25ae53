pub mod artifact;
pub mod browser;
pub mod config;
pub mod error;
pub mod gate;
pub mod job;
pub mod session;
pub(crate) mod sqlite;
pub mod workflow;

pub use artifact::{Artifact, ArtifactError, ArtifactLifecycle, ArtifactSink, HttpSink};
pub use browser::{
    BrowserError, BrowserHandle, BrowserLauncher, BrowserResult, ChromiumSurface,
    ChromiumSurfaceFactory, DriverSurface, OpenOptions, SessionCookie, SurfaceFactory,
};
pub use config::{load_harvest_config, HarvestConfig, SiteSection, TimeoutsSection};
pub use error::{ConfigError, Result};
pub use gate::{ConcurrencyGate, GateRegistry, GateSlot};
pub use job::{Harvester, JobError, JobOutcome, JobRequest, JobResult, JobState};
pub use session::{
    AuthenticatedSurface, Credentials, PersistedSession, SessionError, SessionManager,
    SessionResult, SessionState, SqliteSessionStore, StoreError,
};
pub use workflow::{
    Criticality, Locator, Settle, StepAction, StepResult, StepStatus, Workflow, WorkflowEngine,
    WorkflowError, WorkflowStep,
};
