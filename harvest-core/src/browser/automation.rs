use std::path::{Path, PathBuf};
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam, CookieSameSite};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};
use super::surface::SessionCookie;

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub headless: Option<bool>,
    /// When set, in-page downloads land here without a prompt.
    pub download_dir: Option<PathBuf>,
}

/// Launches one Chromium process per handle. Handles are never shared
/// across jobs.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
    scratch_dir: PathBuf,
}

impl BrowserLauncher {
    pub fn new(config: BrowserSection, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn open(&self, options: OpenOptions) -> BrowserResult<BrowserHandle> {
        let headless = options.headless.unwrap_or(self.config.headless);
        if let Some(dir) = &options.download_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        let user_data_dir = self
            .scratch_dir
            .join(format!("profile-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&user_data_dir)?;

        let chromium_config = self.build_chromium_config(headless, &user_data_dir)?;
        info!(headless, profile = %user_data_dir.display(), "Launching Chromium instance");
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser.new_page(CreateTargetParams::new("about:blank")).await?;
        if let Some(dir) = &options.download_dir {
            Self::allow_downloads(&page, dir).await?;
        }

        Ok(BrowserHandle {
            browser,
            page,
            handler_task: Some(handler_task),
            user_data_dir,
            closed: false,
        })
    }

    async fn allow_downloads(page: &Page, dir: &Path) -> BrowserResult<()> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.execute(params).await?;
        Ok(())
    }

    fn build_chromium_config(
        &self,
        headless: bool,
        user_data_dir: &Path,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().user_data_dir(user_data_dir);
        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!(
                "--window-size={},{}",
                self.config.window_width, self.config.window_height
            ),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(user_agent) = &self.config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        args.extend(self.config.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One controllable browser process. Not reentrant; owned by a single job
/// from open to close.
#[derive(Debug)]
pub struct BrowserHandle {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    user_data_dir: PathBuf,
    closed: bool,
}

impl BrowserHandle {
    pub async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn execute_script(&self, script: &str) -> BrowserResult<serde_json::Value> {
        let value = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Script(format!("failed to decode evaluation result: {err}"))
            })?;
        Ok(value)
    }

    pub async fn cookies(&self) -> BrowserResult<Vec<SessionCookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies.iter().map(SessionCookie::from_cdp).collect())
    }

    pub async fn inject_cookies(&self, cookies: &[SessionCookie]) -> BrowserResult<()> {
        let params = cookies
            .iter()
            .map(SessionCookie::to_cdp)
            .collect::<Result<Vec<_>, _>>()?;
        self.page.set_cookies(params).await?;
        Ok(())
    }

    pub async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        let params = ScreenshotParams::builder().build();
        Ok(self.page.screenshot(params).await?)
    }

    /// Idempotent; never raises. Cleanup must proceed even if the
    /// underlying process is already gone.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        if let Err(err) = std::fs::remove_dir_all(&self.user_data_dir) {
            warn!(path = %self.user_data_dir.display(), error = %err, "failed to remove scratch profile");
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                profile = %self.user_data_dir.display(),
                "BrowserHandle dropped without explicit close"
            );
        }
    }
}

impl SessionCookie {
    fn from_cdp(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site: cookie.same_site.as_ref().map(|s| format!("{s:?}")),
        }
    }

    /// Expiry is not forwarded: restored cookies live for the browser
    /// session, and the store's captured-at timestamp bounds staleness.
    fn to_cdp(&self) -> BrowserResult<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(&self.name)
            .value(&self.value)
            .domain(&self.domain)
            .path(&self.path)
            .secure(self.secure)
            .http_only(self.http_only);
        // Unknown same-site values are coerced to Lax, matching what the
        // browser itself would do with a malformed attribute.
        builder = builder.same_site(match self.same_site.as_deref() {
            Some("Strict") => CookieSameSite::Strict,
            Some("None") => CookieSameSite::None,
            _ => CookieSameSite::Lax,
        });
        builder
            .build()
            .map_err(BrowserError::Configuration)
    }
}
