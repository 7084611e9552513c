use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::errors::{AuthFailure, ProbeError, Result};
use crate::surface::{find_first, BrowsingSurface, ElementId, Locator, SUBMIT_CONTROLS};

/// Session ids are unique process-wide, so a handle issued by one manager
/// never unlocks another manager's surface.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An operator-supplied login. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub credentials: Credentials,
}

impl Identity {
    pub fn new(name: &str, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            credentials: Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
        }
    }

    /// Identity named after its username.
    pub fn from_login(username: &str, password: &str) -> Self {
        Self::new(username, username, password)
    }
}

/// How a submitted login is judged successful.
#[derive(Debug, Clone)]
pub enum LoginCheck {
    /// The password field must be gone from the resulting page.
    FormGone,
    /// The resulting page must match this pattern.
    Marker(Regex),
    /// Trust the submit; only lookup/navigation failures count.
    Assume,
}

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct LoginPage {
    pub url: String,
    pub username_field: String,
    pub password_field: String,
    pub submit_field: String,
    pub check: LoginCheck,
}

impl LoginPage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            submit_field: "submit".to_string(),
            check: LoginCheck::FormGone,
        }
    }

    pub fn fields(mut self, username: &str, password: &str, submit: &str) -> Self {
        self.username_field = username.to_string();
        self.password_field = password.to_string();
        self.submit_field = submit.to_string();
        self
    }

    pub fn check(mut self, check: LoginCheck) -> Self {
        self.check = check;
        self
    }
}

/// Handle for the open session. Only the manager that issued it can close it.
#[derive(Debug, PartialEq, Eq)]
pub struct Session {
    id: u64,
    identity: Option<String>,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or("anonymous")
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub login_settle: Duration,
    pub logout_settle: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            login_settle: Duration::from_secs(2),
            logout_settle: Duration::from_secs(1),
        }
    }
}

/// Owns the browsing surface and hands out at most one open session at a
/// time. Surface access is only granted to the holder of the open session.
pub struct SessionManager<S: BrowsingSurface> {
    surface: S,
    active: Option<(u64, String)>,
    timing: SessionTiming,
}

impl<S: BrowsingSurface> SessionManager<S> {
    pub fn new(surface: S, timing: SessionTiming) -> Self {
        Self {
            surface,
            active: None,
            timing,
        }
    }

    pub fn active_identity(&self) -> Option<&str> {
        self.active.as_ref().map(|(_, label)| label.as_str())
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Surface access for the open session.
    pub fn surface(&mut self, session: &Session) -> Result<&mut S> {
        match self.active {
            Some((id, _)) if id == session.id => Ok(&mut self.surface),
            _ => Err(ProbeError::SessionClosed(session.id)),
        }
    }

    fn ensure_free(&self) -> Result<()> {
        match &self.active {
            Some((_, label)) => Err(ProbeError::SessionConflict {
                active: label.clone(),
            }),
            None => Ok(()),
        }
    }

    fn open(&mut self, identity: Option<String>) -> Session {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let label = identity.clone().unwrap_or_else(|| "anonymous".to_string());
        self.active = Some((id, label));
        Session {
            id,
            identity,
            opened_at: Utc::now(),
        }
    }

    /// Opens a session without logging in.
    pub fn open_anonymous(&mut self) -> Result<Session> {
        self.ensure_free()?;
        let session = self.open(None);
        info!("Opened anonymous session #{}", session.id);
        Ok(session)
    }

    pub async fn login(&mut self, identity: &Identity, page: &LoginPage) -> Result<Session> {
        self.ensure_free()?;
        info!("Logging in as {} at {}", identity.name, page.url);

        if let Err(failure) = self.submit_login(identity, page).await {
            error!("Login failed for {}: {}", identity.name, failure);
            // Whatever the failed attempt left behind must not reach the next login.
            if let Err(e) = self.surface.reset().await {
                warn!("Failed to reset surface after login failure: {}", e);
            }
            return Err(ProbeError::Auth {
                identity: identity.name.clone(),
                failure,
            });
        }

        let session = self.open(Some(identity.name.clone()));
        info!("Successfully logged in as {} (session #{})", identity.name, session.id);
        Ok(session)
    }

    async fn submit_login(
        &mut self,
        identity: &Identity,
        page: &LoginPage,
    ) -> std::result::Result<(), AuthFailure> {
        self.surface
            .navigate(&page.url)
            .await
            .map_err(|e| AuthFailure::SubmitFailed(format!("login page unreachable: {}", e)))?;

        let user = find_first(&mut self.surface, None, &Locator::name(&page.username_field))
            .await
            .map_err(|_| AuthFailure::MissingElement(format!("username field '{}'", page.username_field)))?;
        let pass = find_first(&mut self.surface, None, &Locator::name(&page.password_field))
            .await
            .map_err(|_| AuthFailure::MissingElement(format!("password field '{}'", page.password_field)))?;
        let submit = self.locate_submit(page).await?;

        let fill = async {
            self.surface.clear(user).await?;
            self.surface.send_keys(user, &identity.credentials.username).await?;
            self.surface.clear(pass).await?;
            self.surface.send_keys(pass, &identity.credentials.password).await?;
            self.surface.click(submit).await
        };
        fill.await.map_err(|e| AuthFailure::SubmitFailed(e.to_string()))?;

        tokio::time::sleep(self.timing.login_settle).await;
        self.verify_login(page).await
    }

    async fn locate_submit(&mut self, page: &LoginPage) -> std::result::Result<ElementId, AuthFailure> {
        if let Ok(el) = find_first(&mut self.surface, None, &Locator::name(&page.submit_field)).await {
            return Ok(el);
        }
        debug!(
            "No element named '{}', falling back to the password form's submit control",
            page.submit_field
        );

        let missing = || AuthFailure::MissingElement(format!("submit control '{}'", page.submit_field));
        let forms = self
            .surface
            .find_elements(None, &Locator::tag("form"))
            .await
            .map_err(|_| missing())?;
        for form in forms {
            let owns_password = self
                .surface
                .find_elements(Some(form), &Locator::name(&page.password_field))
                .await
                .map(|found| !found.is_empty())
                .unwrap_or(false);
            if owns_password {
                return find_first(&mut self.surface, Some(form), &Locator::css(SUBMIT_CONTROLS))
                    .await
                    .map_err(|_| missing());
            }
        }
        Err(missing())
    }

    async fn verify_login(&mut self, page: &LoginPage) -> std::result::Result<(), AuthFailure> {
        match &page.check {
            LoginCheck::Assume => Ok(()),
            LoginCheck::Marker(marker) => {
                let source = self
                    .surface
                    .page_source()
                    .await
                    .map_err(|e| AuthFailure::SubmitFailed(e.to_string()))?;
                if marker.is_match(&source) {
                    Ok(())
                } else {
                    Err(AuthFailure::MarkerNotFound(marker.as_str().to_string()))
                }
            }
            LoginCheck::FormGone => {
                let still_there = self
                    .surface
                    .find_elements(None, &Locator::name(&page.password_field))
                    .await
                    .map(|found| !found.is_empty())
                    .unwrap_or(false);
                if still_there {
                    Err(AuthFailure::LoginFormStillPresent)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Closes `session`. Never fails: problems are logged as cleanup errors
    /// and the surface state is wiped regardless.
    pub async fn logout(&mut self, session: Session, logout_url: Option<&str>) {
        match self.active {
            Some((id, _)) if id == session.id => {}
            _ => {
                warn!("Ignoring logout of inactive session #{}", session.id);
                return;
            }
        }

        if let Some(url) = logout_url {
            match self.surface.navigate(url).await {
                Ok(()) => {
                    tokio::time::sleep(self.timing.logout_settle).await;
                    info!("Successfully logged out {} via {}", session.label(), url);
                }
                Err(e) => {
                    let err = ProbeError::Cleanup(format!(
                        "logout of {} via {} failed: {}",
                        session.label(),
                        url,
                        e
                    ));
                    error!("{}", err);
                }
            }
        }

        if let Err(e) = self.surface.reset().await {
            error!("{}", ProbeError::Cleanup(format!("surface reset failed: {}", e)));
        }
        self.active = None;
        info!("Session #{} for {} closed", session.id, session.label());
    }
}
