#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dualprobe_core::errors::SurfaceError;
use dualprobe_core::http::{PageRequest, PageResponse, Transport};
use dualprobe_core::{HtmlSurface, ProbeConfig, SilentSink, SinkRef};

/// What a route answers.
pub struct Reply {
    pub body: String,
    pub delay: Duration,
    pub login_as: Option<String>,
    pub logout: bool,
}

impl Reply {
    pub fn page(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            delay: Duration::ZERO,
            login_as: None,
            logout: false,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn login_as(mut self, user: &str) -> Self {
        self.login_as = Some(user.to_string());
        self
    }

    pub fn logout(mut self) -> Self {
        self.logout = true;
        self
    }
}

type Handler = Box<dyn Fn(&PageRequest, Option<&str>) -> Reply + Send + Sync>;

#[derive(Default)]
struct State {
    user: Option<String>,
    requests: Vec<PageRequest>,
    logins: Vec<String>,
    resets: usize,
}

/// In-memory site keyed by path. The logged-in user plays the role of the
/// session cookie and is dropped on `reset`.
#[derive(Clone)]
pub struct FakeSite {
    routes: Arc<HashMap<String, Handler>>,
    state: Arc<Mutex<State>>,
}

pub struct FakeSiteBuilder {
    routes: HashMap<String, Handler>,
}

impl FakeSiteBuilder {
    pub fn route<F>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(&PageRequest, Option<&str>) -> Reply + Send + Sync + 'static,
    {
        self.routes.insert(path.to_string(), Box::new(handler));
        self
    }

    pub fn page(self, path: &str, body: &'static str) -> Self {
        self.route(path, move |_, _| Reply::page(body))
    }

    /// `/login` accepting `users`, and `/logout`.
    pub fn with_login(self, users: &[(&str, &str)]) -> Self {
        let users: Vec<(String, String)> = users
            .iter()
            .map(|(u, p)| (u.to_string(), p.to_string()))
            .collect();
        self.route("/login", move |req, _| {
            if req.form.is_none() {
                return Reply::page(LOGIN_PAGE);
            }
            let user = req.field("username").unwrap_or_default();
            let pass = req.field("password").unwrap_or_default();
            if users.iter().any(|(u, p)| *u == user && *p == pass) {
                Reply::page(format!(
                    "<html><body><p>Welcome, {}</p><a href=\"/\">home</a></body></html>",
                    user
                ))
                .login_as(&user)
            } else {
                Reply::page(LOGIN_FAILED_PAGE)
            }
        })
        .route("/logout", |_, _| {
            Reply::page("<html><body>Bye</body></html>").logout()
        })
    }

    pub fn build(self) -> FakeSite {
        FakeSite {
            routes: Arc::new(self.routes),
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

pub const LOGIN_PAGE: &str = r#"<html><body>
<form action="/login" method="post">
  <input type="text" name="username">
  <input type="password" name="password">
  <input type="submit" name="submit" value="Log in">
</form>
</body></html>"#;

pub const LOGIN_FAILED_PAGE: &str = r#"<html><body>
<p>Invalid credentials</p>
<form action="/login" method="post">
  <input type="text" name="username">
  <input type="password" name="password">
  <input type="submit" name="submit" value="Log in">
</form>
</body></html>"#;

impl FakeSite {
    pub fn builder() -> FakeSiteBuilder {
        FakeSiteBuilder {
            routes: HashMap::new(),
        }
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Paths requested, in order, with the query string when present.
    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| match r.url.query() {
                Some(q) => format!("{}?{}", r.url.path(), q),
                None => r.url.path().to_string(),
            })
            .collect()
    }

    pub fn logins(&self) -> Vec<String> {
        self.state.lock().unwrap().logins.clone()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn current_user(&self) -> Option<String> {
        self.state.lock().unwrap().user.clone()
    }
}

#[async_trait]
impl Transport for FakeSite {
    async fn fetch(&mut self, request: &PageRequest) -> Result<PageResponse, SurfaceError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            let handler = self.routes.get(request.url.path()).ok_or_else(|| {
                SurfaceError::Navigation {
                    url: request.url.to_string(),
                    reason: "404 Not Found".to_string(),
                }
            })?;
            let reply = handler(request, state.user.as_deref());
            if let Some(ref user) = reply.login_as {
                state.user = Some(user.clone());
                state.logins.push(user.clone());
            }
            if reply.logout {
                state.user = None;
            }
            reply
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        Ok(PageResponse {
            url: request.url.clone(),
            status: 200,
            body: reply.body,
        })
    }

    fn reset(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        state.user = None;
        state.resets += 1;
        Ok(())
    }
}

pub fn surface(site: &FakeSite) -> HtmlSurface<FakeSite> {
    HtmlSurface::new(site.clone(), Duration::from_secs(10))
}

/// Defaults with every settle pause and delay removed.
pub fn quick_config() -> ProbeConfig {
    ProbeConfig {
        login_settle_ms: 0,
        logout_settle_ms: 0,
        page_settle_ms: 0,
        attempt_delay_ms: 0,
        ..ProbeConfig::default()
    }
}

pub fn silent() -> SinkRef {
    Arc::new(SilentSink)
}

pub fn url(s: &str) -> url::Url {
    url::Url::parse(s).unwrap()
}
