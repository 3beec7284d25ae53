//! Trait seam between the Chromium handle and the components that drive it.
//!
//! The session manager and workflow engine only ever talk to a
//! [`DriverSurface`]; tests supply mock implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::automation::{BrowserHandle, BrowserLauncher, OpenOptions};
use super::error::BrowserResult;

/// A cookie as persisted and restored across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

/// One authenticated-or-not browser tab, exclusively owned by a job.
#[async_trait]
pub trait DriverSurface: Send {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    async fn current_url(&mut self) -> BrowserResult<String>;
    async fn execute(&mut self, script: &str) -> BrowserResult<serde_json::Value>;
    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>>;
    async fn inject_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()>;
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;
    /// Idempotent; never raises.
    async fn close(&mut self);
}

#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn open(&self, options: OpenOptions) -> BrowserResult<Box<dyn DriverSurface>>;
}

pub struct ChromiumSurface {
    handle: BrowserHandle,
}

#[async_trait]
impl DriverSurface for ChromiumSurface {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.handle.navigate(url).await
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        self.handle.current_url().await
    }

    async fn execute(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        self.handle.execute_script(script).await
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        self.handle.cookies().await
    }

    async fn inject_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()> {
        self.handle.inject_cookies(cookies).await
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        self.handle.screenshot().await
    }

    async fn close(&mut self) {
        self.handle.close().await;
    }
}

pub struct ChromiumSurfaceFactory {
    launcher: Arc<BrowserLauncher>,
}

impl ChromiumSurfaceFactory {
    pub fn new(launcher: BrowserLauncher) -> Self {
        Self {
            launcher: Arc::new(launcher),
        }
    }
}

#[async_trait]
impl SurfaceFactory for ChromiumSurfaceFactory {
    async fn open(&self, options: OpenOptions) -> BrowserResult<Box<dyn DriverSurface>> {
        let handle = self.launcher.open(options).await?;
        Ok(Box::new(ChromiumSurface { handle }))
    }
}
