//! Artifact lifecycle: wait for the export the browser dropped into the
//! job's download directory, verify it, hand its bytes to a sink, and
//! delete it. Dispatch and deletion are best-effort; resolution and
//! verification are not.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::TimeoutsSection;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("no file matching {pattern} appeared in {dir} within {waited_ms}ms")]
    NotProduced {
        pattern: String,
        dir: PathBuf,
        waited_ms: u64,
    },
    #[error("artifact {path} is empty")]
    Empty { path: PathBuf },
    #[error("invalid artifact pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// A resolved export file and what has happened to it so far.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub verified: bool,
    pub dispatched: bool,
    pub deleted: bool,
}

impl Artifact {
    fn resolved(path: PathBuf, name: String, size: u64) -> Self {
        Self {
            path,
            name,
            size,
            verified: false,
            dispatched: false,
            deleted: false,
        }
    }
}

pub type SinkResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Destination for artifact bytes. Delivery failures never fail the job.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, artifact: &Artifact, bytes: &[u8]) -> SinkResult;
}

/// POSTs artifact bytes to a fixed endpoint.
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactSink for HttpSink {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn deliver(&self, artifact: &Artifact, bytes: &[u8]) -> SinkResult {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-artifact-name", artifact.name.clone())
            .body(bytes.to_vec())
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactLifecycle {
    settle: Duration,
    retry: Duration,
}

impl From<&TimeoutsSection> for ArtifactLifecycle {
    fn from(timeouts: &TimeoutsSection) -> Self {
        Self {
            settle: Duration::from_millis(timeouts.artifact_settle_ms),
            retry: Duration::from_millis(timeouts.artifact_retry_ms),
        }
    }
}

impl ArtifactLifecycle {
    pub fn new(settle: Duration, retry: Duration) -> Self {
        Self { settle, retry }
    }

    /// Waits out the settle delay, then scans the download directory for
    /// the newest file matching `pattern`. One retry after a longer wait
    /// covers slow exports; after that the artifact is declared missing.
    pub async fn resolve(&self, dir: &Path, pattern: &str) -> ArtifactResult<Artifact> {
        let matcher = Regex::new(pattern)?;
        sleep(self.settle).await;
        let mut waited = self.settle;
        if let Some(artifact) = scan_newest(dir, &matcher)? {
            return Ok(artifact);
        }
        debug!(dir = %dir.display(), pattern, "no artifact after settle, retrying once");
        sleep(self.retry).await;
        waited += self.retry;
        match scan_newest(dir, &matcher)? {
            Some(artifact) => Ok(artifact),
            None => Err(ArtifactError::NotProduced {
                pattern: pattern.to_string(),
                dir: dir.to_path_buf(),
                waited_ms: waited.as_millis() as u64,
            }),
        }
    }

    pub fn verify(&self, artifact: &mut Artifact) -> ArtifactResult<()> {
        if artifact.size == 0 {
            return Err(ArtifactError::Empty {
                path: artifact.path.clone(),
            });
        }
        artifact.verified = true;
        Ok(())
    }

    pub async fn read(&self, artifact: &Artifact) -> ArtifactResult<Vec<u8>> {
        Ok(tokio::fs::read(&artifact.path).await?)
    }

    /// Hands the bytes to the sink. Returns whether delivery succeeded;
    /// a failed delivery is logged and the job goes on.
    pub async fn dispatch(
        &self,
        artifact: &mut Artifact,
        bytes: &[u8],
        sink: &dyn ArtifactSink,
    ) -> bool {
        match sink.deliver(artifact, bytes).await {
            Ok(()) => {
                debug!(artifact = %artifact.name, sink = sink.name(), "artifact dispatched");
                artifact.dispatched = true;
                true
            }
            Err(err) => {
                warn!(
                    artifact = %artifact.name,
                    sink = sink.name(),
                    error = %err,
                    "artifact dispatch failed"
                );
                false
            }
        }
    }

    /// Deletes the artifact file. Returns whether deletion succeeded; a
    /// leftover file is logged, never fatal.
    pub async fn cleanup(&self, artifact: &mut Artifact) -> bool {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {
                artifact.deleted = true;
                true
            }
            Err(err) => {
                warn!(path = %artifact.path.display(), error = %err, "failed to delete artifact");
                false
            }
        }
    }
}

fn scan_newest(dir: &Path, matcher: &Regex) -> ArtifactResult<Option<Artifact>> {
    let mut newest: Option<(SystemTime, Artifact)> = None;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !matcher.is_match(&name) {
            continue;
        }
        let stamp = metadata
            .modified()
            .or_else(|_| metadata.created())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let candidate = Artifact::resolved(entry.path(), name, metadata.len());
        match &newest {
            Some((best, _)) if *best >= stamp => {}
            _ => newest = Some((stamp, candidate)),
        }
    }
    Ok(newest.map(|(_, artifact)| artifact))
}
