use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use harvest_core::browser::{
    BrowserResult, DriverSurface, OpenOptions, SessionCookie, SurfaceFactory,
};
use harvest_core::config::{SiteSection, TimeoutsSection};
use harvest_core::session::{
    Credentials, SessionError, SessionManager, SessionState, SqliteSessionStore,
};
use harvest_core::workflow::Locator;

const DASHBOARD: &str = "https://app.example.com/dashboard";
const LOGIN: &str = "https://app.example.com/login";

fn test_site() -> SiteSection {
    SiteSection {
        domain: "app.example.com".to_string(),
        dashboard_url: DASHBOARD.to_string(),
        login_url: LOGIN.to_string(),
        login_path: "/login".to_string(),
        identity_locator: Locator::Css("#login-email".to_string()),
        secret_locator: Locator::Css("#login-secret".to_string()),
        submit_locator: Locator::Css("#login-submit".to_string()),
        marker_locator: Locator::Css(".dashboard-shell".to_string()),
        pool_capacity: None,
    }
}

fn fast_timeouts() -> TimeoutsSection {
    TimeoutsSection {
        marker_probe_ms: 60,
        probe_interval_ms: 10,
        login_redirect_ms: 60,
        login_poll_interval_ms: 10,
        step_ready_ms: 60,
        step_poll_interval_ms: 10,
        settle_default_ms: 5,
        artifact_settle_ms: 5,
        artifact_retry_ms: 5,
    }
}

fn valid_cookie() -> SessionCookie {
    SessionCookie {
        name: "sid".to_string(),
        value: "valid".to_string(),
        domain: ".app.example.com".to_string(),
        path: "/".to_string(),
        secure: true,
        http_only: true,
        same_site: Some("Lax".to_string()),
    }
}

/// A login page state machine: the marker renders only while logged in,
/// submit either redirects or leaves the page stuck, and cookie injection
/// authenticates only when the jar carries the valid session id.
struct MockLoginSurface {
    url: String,
    logged_in: bool,
    accept_credentials: bool,
    redirects: bool,
    navigations: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl DriverSurface for MockLoginSurface {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.url = url.to_string();
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.url.clone())
    }

    async fn execute(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        if script.contains(".dashboard-shell") {
            return Ok(serde_json::Value::Bool(self.logged_in));
        }
        if script.contains("#login-submit") {
            if self.accept_credentials {
                self.logged_in = true;
            }
            if self.redirects {
                self.url = DASHBOARD.to_string();
            }
            return Ok(serde_json::Value::Bool(true));
        }
        if script.contains("#login-email") || script.contains("#login-secret") {
            return Ok(serde_json::Value::Bool(true));
        }
        Ok(serde_json::Value::Bool(false))
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        Ok(if self.logged_in {
            vec![valid_cookie()]
        } else {
            Vec::new()
        })
    }

    async fn inject_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()> {
        if cookies.iter().any(|c| c.name == "sid" && c.value == "valid") {
            self.logged_in = true;
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockFactory {
    accept_credentials: bool,
    redirects: bool,
    navigations: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockFactory {
    fn new(accept_credentials: bool, redirects: bool) -> Self {
        Self {
            accept_credentials,
            redirects,
            navigations: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SurfaceFactory for MockFactory {
    async fn open(&self, _options: OpenOptions) -> BrowserResult<Box<dyn DriverSurface>> {
        Ok(Box::new(MockLoginSurface {
            url: "about:blank".to_string(),
            logged_in: false,
            accept_credentials: self.accept_credentials,
            redirects: self.redirects,
            navigations: Arc::clone(&self.navigations),
            closed: Arc::clone(&self.closed),
        }))
    }
}

fn manager(factory: Arc<MockFactory>, dir: &tempfile::TempDir) -> SessionManager {
    let store = SqliteSessionStore::new(dir.path().join("sessions.db"));
    store.initialize().expect("initialize store");
    SessionManager::new(factory, store, fast_timeouts())
}

fn credentials() -> Credentials {
    Credentials {
        identity: "ops@example.com".to_string(),
        secret: "hunter2".to_string(),
    }
}

#[tokio::test]
async fn fresh_login_authenticates_and_persists_the_jar() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(true, true));
    let manager = manager(Arc::clone(&factory), &dir);

    let mut session = manager
        .acquire(&test_site(), Some(&credentials()), OpenOptions::default())
        .await
        .expect("login succeeds");
    assert!(!session.restored);
    assert_eq!(session.state, SessionState::Authenticated);
    session.surface.close().await;

    let persisted = manager
        .store()
        .load("app.example.com")
        .expect("load")
        .expect("jar persisted");
    assert_eq!(persisted.cookies[0].value, "valid");
}

#[tokio::test]
async fn persisted_jar_restores_without_touching_the_login_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(false, false));
    let manager = manager(Arc::clone(&factory), &dir);
    manager
        .store()
        .replace("app.example.com", &[valid_cookie()])
        .expect("seed jar");
    let seeded = manager
        .store()
        .load("app.example.com")
        .expect("load")
        .expect("jar seeded");

    let mut session = manager
        .acquire(&test_site(), None, OpenOptions::default())
        .await
        .expect("restore succeeds");
    assert!(session.restored);
    session.surface.close().await;

    let navigations = factory.navigations.lock().unwrap();
    assert!(navigations.iter().all(|url| !url.contains("/login")));

    // A restore reads the jar; only a fresh login writes it back.
    let after = manager
        .store()
        .load("app.example.com")
        .expect("load")
        .expect("jar still present");
    assert_eq!(after.captured_at, seeded.captured_at);
}

#[tokio::test]
async fn stale_jar_without_credentials_is_rejected_and_cleared() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(false, false));
    let manager = manager(Arc::clone(&factory), &dir);
    let mut stale = valid_cookie();
    stale.value = "expired".to_string();
    manager
        .store()
        .replace("app.example.com", &[stale])
        .expect("seed stale jar");

    let err = manager
        .acquire(&test_site(), None, OpenOptions::default())
        .await
        .expect_err("no credentials to fall back on");
    assert!(matches!(err, SessionError::CredentialsRequired { .. }));
    assert!(factory.closed.load(Ordering::SeqCst));
    assert!(manager
        .store()
        .load("app.example.com")
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn login_that_never_leaves_the_login_page_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(true, false));
    let manager = manager(Arc::clone(&factory), &dir);

    let err = manager
        .acquire(&test_site(), Some(&credentials()), OpenOptions::default())
        .await
        .expect_err("redirect never happens");
    match err {
        SessionError::LoginTimeout { waited_ms, .. } => assert!(waited_ms >= 60),
        other => panic!("unexpected error: {other}"),
    }
    assert!(factory.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn rejected_credentials_fail_authentication() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(false, true));
    let manager = manager(Arc::clone(&factory), &dir);

    let err = manager
        .acquire(&test_site(), Some(&credentials()), OpenOptions::default())
        .await
        .expect_err("marker never renders");
    assert!(matches!(err, SessionError::AuthenticationFailed { .. }));
    assert!(factory.closed.load(Ordering::SeqCst));
}

#[test]
fn credentials_debug_never_prints_the_secret() {
    let rendered = format!("{:?}", credentials());
    assert!(rendered.contains("ops@example.com"));
    assert!(!rendered.contains("hunter2"));
}

#[tokio::test]
async fn authenticated_surface_debug_shows_state_not_the_driver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = Arc::new(MockFactory::new(true, true));
    let manager = manager(Arc::clone(&factory), &dir);

    let mut session = manager
        .acquire(&test_site(), Some(&credentials()), OpenOptions::default())
        .await
        .expect("login succeeds");
    let rendered = format!("{session:?}");
    session.surface.close().await;

    assert!(rendered.contains("Authenticated"));
    assert!(rendered.contains("restored: false"));
}
