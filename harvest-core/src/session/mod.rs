//! Session establishment: restore a persisted cookie jar when it still
//! authenticates, fall back to a scripted login otherwise, and persist the
//! resulting jar for the next job on the same site.

mod store;

pub use store::{PersistedSession, SqliteSessionStore, StoreError, StoreResult};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, DriverSurface, OpenOptions, SurfaceFactory};
use crate::config::{SiteSection, TimeoutsSection};
use crate::workflow::script;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("site {domain} has no restorable session and no credentials were supplied")]
    CredentialsRequired { domain: String },
    #[error("login to {domain} did not leave the login page within {waited_ms}ms")]
    LoginTimeout { domain: String, waited_ms: u64 },
    #[error("credentials for {domain} were rejected")]
    AuthenticationFailed { domain: String },
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Login credentials for one site. The secret never appears in debug output.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authentication state of one browser surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Invalid,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Invalid => "invalid",
        };
        f.write_str(label)
    }
}

/// A surface that has passed the site's authentication marker probe.
pub struct AuthenticatedSurface {
    pub surface: Box<dyn DriverSurface>,
    pub state: SessionState,
    /// True when the persisted jar authenticated without a fresh login.
    pub restored: bool,
}

impl fmt::Debug for AuthenticatedSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSurface")
            .field("state", &self.state)
            .field("restored", &self.restored)
            .finish_non_exhaustive()
    }
}

/// Opens surfaces and gets them authenticated against a site, preferring a
/// persisted cookie jar over a fresh scripted login.
pub struct SessionManager {
    factory: Arc<dyn SurfaceFactory>,
    store: SqliteSessionStore,
    timeouts: TimeoutsSection,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        store: SqliteSessionStore,
        timeouts: TimeoutsSection,
    ) -> Self {
        Self {
            factory,
            store,
            timeouts,
        }
    }

    pub fn store(&self) -> &SqliteSessionStore {
        &self.store
    }

    /// Produces an authenticated surface for `site`, or closes the surface
    /// and reports why it could not. Restore is attempted first when a jar
    /// is persisted for the domain; only a fresh login rewrites the jar,
    /// so concurrent fresh logins on one site converge on the last writer.
    pub async fn acquire(
        &self,
        site: &SiteSection,
        credentials: Option<&Credentials>,
        options: OpenOptions,
    ) -> SessionResult<AuthenticatedSurface> {
        let mut surface = self.factory.open(options).await?;
        debug!(domain = %site.domain, state = %SessionState::Authenticating, "session state");
        match self.authenticate(surface.as_mut(), site, credentials).await {
            Ok(restored) => {
                debug!(domain = %site.domain, state = %SessionState::Authenticated, "session state");
                Ok(AuthenticatedSurface {
                    surface,
                    state: SessionState::Authenticated,
                    restored,
                })
            }
            Err(err) => {
                debug!(domain = %site.domain, state = %SessionState::Invalid, "session state");
                surface.close().await;
                Err(err)
            }
        }
    }

    async fn authenticate(
        &self,
        surface: &mut dyn DriverSurface,
        site: &SiteSection,
        credentials: Option<&Credentials>,
    ) -> SessionResult<bool> {
        let mut restored = false;
        if let Some(session) = self.store.load(&site.domain)? {
            debug!(
                domain = %site.domain,
                cookies = session.cookies.len(),
                captured_at = %session.captured_at,
                "attempting session restore"
            );
            surface.inject_cookies(&session.cookies).await?;
            surface.navigate(&site.dashboard_url).await?;
            if self.probe_marker(surface, site).await? {
                info!(domain = %site.domain, "restored persisted session");
                restored = true;
            } else {
                warn!(domain = %site.domain, "persisted session no longer authenticates");
                self.store.clear(&site.domain)?;
            }
        }

        if !restored {
            let credentials = credentials.ok_or_else(|| SessionError::CredentialsRequired {
                domain: site.domain.clone(),
            })?;
            self.login(surface, site, credentials).await?;
            // Persist only the jar of a verified fresh login; a restored
            // jar is already the stored one.
            let cookies = surface.cookies().await?;
            self.store.replace(&site.domain, &cookies)?;
        }

        Ok(restored)
    }

    async fn login(
        &self,
        surface: &mut dyn DriverSurface,
        site: &SiteSection,
        credentials: &Credentials,
    ) -> SessionResult<()> {
        info!(domain = %site.domain, "performing fresh login");
        surface.navigate(&site.login_url).await?;

        self.fill(surface, site, &site.identity_locator, &credentials.identity)
            .await?;
        self.fill(surface, site, &site.secret_locator, &credentials.secret)
            .await?;
        let clicked = surface
            .execute(&script::click(&site.submit_locator))
            .await?
            .as_bool()
            .unwrap_or(false);
        if !clicked {
            return Err(SessionError::AuthenticationFailed {
                domain: site.domain.clone(),
            });
        }

        self.await_redirect(surface, site).await?;

        if !self.probe_marker(surface, site).await? {
            return Err(SessionError::AuthenticationFailed {
                domain: site.domain.clone(),
            });
        }
        info!(domain = %site.domain, "login succeeded");
        Ok(())
    }

    async fn fill(
        &self,
        surface: &mut dyn DriverSurface,
        site: &SiteSection,
        locator: &crate::workflow::Locator,
        value: &str,
    ) -> SessionResult<()> {
        let deadline = Instant::now() + Duration::from_millis(self.timeouts.marker_probe_ms);
        let probe = script::readiness(locator);
        loop {
            let ready = surface.execute(&probe).await?.as_bool().unwrap_or(false);
            if ready {
                break;
            }
            if Instant::now() >= deadline {
                return Err(SessionError::AuthenticationFailed {
                    domain: site.domain.clone(),
                });
            }
            sleep(Duration::from_millis(self.timeouts.probe_interval_ms)).await;
        }
        let filled = surface
            .execute(&script::input(locator, value))
            .await?
            .as_bool()
            .unwrap_or(false);
        if !filled {
            return Err(SessionError::AuthenticationFailed {
                domain: site.domain.clone(),
            });
        }
        Ok(())
    }

    /// Waits for the browser to leave the login path after submit. The
    /// redirect target is not checked here; the marker probe that follows
    /// decides whether the login actually worked.
    async fn await_redirect(
        &self,
        surface: &mut dyn DriverSurface,
        site: &SiteSection,
    ) -> SessionResult<()> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.timeouts.login_redirect_ms);
        loop {
            let url = surface.current_url().await?;
            let on_login_page = match url::Url::parse(&url) {
                Ok(parsed) => parsed.path().starts_with(&site.login_path),
                Err(_) => url.contains(&site.login_path),
            };
            if !on_login_page {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::LoginTimeout {
                    domain: site.domain.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            sleep(Duration::from_millis(self.timeouts.login_poll_interval_ms)).await;
        }
    }

    async fn probe_marker(
        &self,
        surface: &mut dyn DriverSurface,
        site: &SiteSection,
    ) -> SessionResult<bool> {
        let probe = script::readiness(&site.marker_locator);
        let deadline = Instant::now() + Duration::from_millis(self.timeouts.marker_probe_ms);
        loop {
            let present = surface.execute(&probe).await?.as_bool().unwrap_or(false);
            if present {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(self.timeouts.probe_interval_ms)).await;
        }
    }
}
