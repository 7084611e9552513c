use log::{error, info, warn};
use regex::Regex;
use std::sync::Arc;
use url::Url;

use crate::core::budget::{RunBudget, StopReason};
use crate::core::result_aggregator::{Finding, FindingCollector};
use crate::core::session::{Identity, LoginPage, Session, SessionManager};
use crate::errors::Result;
use crate::modules::crawler::{CrawlTarget, Crawler, Scope};
use crate::modules::idor::DifferentialAccessProbe;
use crate::modules::injection::InjectionProbe;
use crate::surface::BrowsingSurface;
use crate::utils::payload_catalog::PayloadCatalog;
use crate::{ProbeConfig, SinkRef};

/// Inputs of a differential access run.
#[derive(Debug, Clone)]
pub struct IdorPlan {
    pub start_url: Url,
    pub login: LoginPage,
    pub logout_url: Option<String>,
    /// Identity whose data is being looked for.
    pub owner: Identity,
    /// Identity that should not be able to see it.
    pub other: Identity,
    pub pattern: Regex,
}

/// Inputs of an injection run. Without `login` the crawl runs anonymously.
#[derive(Debug, Clone)]
pub struct InjectionPlan {
    pub target: Url,
    pub login: Option<(Identity, LoginPage)>,
    pub logout_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_visited: usize,
    pub endpoints: usize,
    pub forms: usize,
    pub attempts: usize,
    pub findings: usize,
    pub stopped: Option<StopReason>,
}

/// Same-host scope that never follows the logout link, so a crawl cannot
/// end its own session.
fn crawl_scope(start: &Url, logout_url: Option<&str>) -> Scope {
    let scope = Scope::same_host(start);
    match logout_url.and_then(|u| start.join(u).ok()) {
        Some(logout) => scope.excluding(&logout),
        None => scope,
    }
}

/// Drives one probing run over a single browsing surface.
///
/// Phases run strictly one after another and every session opened by a phase
/// is closed before the next one starts, also when the phase fails.
pub struct ProbeEngine<S: BrowsingSurface> {
    sessions: SessionManager<S>,
    crawler: Crawler,
    injector: InjectionProbe,
    collector: FindingCollector,
    budget: RunBudget,
    config: ProbeConfig,
    sink: SinkRef,
}

impl<S: BrowsingSurface> ProbeEngine<S> {
    pub fn new(
        surface: S,
        config: ProbeConfig,
        catalog: Arc<PayloadCatalog>,
        collector: FindingCollector,
        sink: SinkRef,
        budget: RunBudget,
    ) -> Self {
        Self {
            sessions: SessionManager::new(surface, config.session_timing()),
            crawler: Crawler::new(config.crawl_options()),
            injector: InjectionProbe::new(catalog, config.injection_options()),
            collector,
            budget,
            config,
            sink,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        self.collector.findings()
    }

    pub fn take_findings(&mut self) -> Vec<Finding> {
        self.collector.drain()
    }

    pub fn into_surface(self) -> S {
        self.sessions.into_surface()
    }

    /// Crawls as the owner, then replays the owner's identity-scoped pages as
    /// the other identity. Login failures are fatal.
    pub async fn run_idor(&mut self, plan: &IdorPlan) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let probe =
            DifferentialAccessProbe::new(plan.pattern.clone()).with_settle(self.config.page_settle());
        let scope = crawl_scope(&plan.start_url, plan.logout_url.as_deref());

        self.sink.on_log(
            "phase",
            &format!("[*] Phase 1: crawling {} as {}", plan.start_url, plan.owner.name),
        );
        let owner_session = self.sessions.login(&plan.owner, &plan.login).await?;
        let target = CrawlTarget::IdentityContent(plan.pattern.clone());
        let inventory = match self.sessions.surface(&owner_session) {
            Ok(surface) => {
                self.crawler
                    .crawl(surface, &plan.start_url, &scope, &target, &self.budget)
                    .await
            }
            Err(e) => {
                self.sessions.logout(owner_session, plan.logout_url.as_deref()).await;
                return Err(e);
            }
        };
        self.sessions.logout(owner_session, plan.logout_url.as_deref()).await;

        let endpoints = probe.collect(&inventory);
        summary.pages_visited = inventory.visited.len();
        summary.endpoints = endpoints.len();
        summary.stopped = inventory.stopped;
        info!("Collected {} identity-scoped URL(s) for {}", endpoints.len(), plan.owner.name);
        self.sink.on_log(
            "info",
            &format!("[*] {} page(s) visited, {} candidate URL(s)", summary.pages_visited, endpoints.len()),
        );

        if endpoints.is_empty() {
            self.sink.on_log("warn", "[!] Nothing to verify; skipping second identity");
            return Ok(summary);
        }
        if let Some(reason) = self.budget.exhausted() {
            warn!("Skipping verification ({:?})", reason);
            summary.stopped = Some(reason);
            return Ok(summary);
        }
        if let Some(left) = self.budget.remaining() {
            info!("{}s of the run deadline left for verification", left.as_secs());
        }

        self.sink.on_log(
            "phase",
            &format!("[*] Phase 2: verifying {} URL(s) as {}", endpoints.len(), plan.other.name),
        );
        let other_session = self.sessions.login(&plan.other, &plan.login).await?;
        let stats = match self.sessions.surface(&other_session) {
            Ok(surface) => {
                probe
                    .verify(surface, &other_session, &endpoints, &mut self.collector, &self.budget)
                    .await
            }
            Err(e) => {
                self.sessions.logout(other_session, plan.logout_url.as_deref()).await;
                return Err(e);
            }
        };
        self.sessions.logout(other_session, plan.logout_url.as_deref()).await;

        summary.attempts = stats.checked;
        summary.findings = self.collector.len();
        if summary.stopped.is_none() {
            summary.stopped = self.budget.exhausted();
        }
        Ok(summary)
    }

    /// Crawls for login forms and runs the payload catalog against each.
    pub async fn run_injection(&mut self, plan: &InjectionPlan) -> Result<RunSummary> {
        let session = match &plan.login {
            Some((identity, page)) => self.sessions.login(identity, page).await?,
            None => self.sessions.open_anonymous()?,
        };

        let outcome = self.inject_as(&session, plan).await;
        self.sessions.logout(session, plan.logout_url.as_deref()).await;
        if let Err(ref e) = outcome {
            error!("Injection run aborted: {}", e);
        }
        outcome
    }

    async fn inject_as(&mut self, session: &Session, plan: &InjectionPlan) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let scope = crawl_scope(&plan.target, plan.logout_url.as_deref());
        let surface = self.sessions.surface(session)?;

        self.sink.on_log(
            "phase",
            &format!("[*] Crawling {} for login forms as {}", plan.target, session.label()),
        );
        let inventory = self
            .crawler
            .crawl(surface, &plan.target, &scope, &CrawlTarget::LoginForms, &self.budget)
            .await;
        summary.pages_visited = inventory.visited.len();
        summary.endpoints = inventory.endpoints.len();
        summary.forms = inventory.forms.len();
        summary.stopped = inventory.stopped;

        if inventory.forms.is_empty() {
            self.sink.on_log("warn", "[!] No login forms found");
            return Ok(summary);
        }
        self.sink.on_log(
            "phase",
            &format!(
                "[*] Testing {} form(s) with {} payload(s)",
                inventory.forms.len(),
                self.injector.catalog().len()
            ),
        );

        let total: usize = inventory.forms.iter().map(|f| self.injector.planned_attempts(f)).sum();
        let mut done = 0;
        self.sink.on_progress("Injecting payloads", done, total);
        for form in &inventory.forms {
            if let Some(reason) = self.budget.exhausted() {
                warn!("Injection phase stopped early ({:?})", reason);
                summary.stopped = Some(reason);
                break;
            }
            let report = self
                .injector
                .test(surface, session, form, &mut self.collector, &self.budget)
                .await;
            summary.attempts += report.attempts;
            done += self.injector.planned_attempts(form);
            self.sink.on_progress("Injecting payloads", done, total);
        }

        summary.findings = self.collector.len();
        if summary.stopped.is_none() {
            summary.stopped = self.budget.exhausted();
        }
        Ok(summary)
    }
}
