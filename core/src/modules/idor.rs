use log::{debug, info, warn};
use regex::Regex;
use std::time::Duration;

use crate::core::budget::RunBudget;
use crate::core::result_aggregator::{Finding, FindingCollector};
use crate::core::session::Session;
use crate::errors::ProbeError;
use crate::modules::crawler::{Endpoint, Inventory};
use crate::surface::BrowsingSurface;
use crate::utils::detector::excerpt;

/// Replays one identity's scoped endpoints under another identity and flags
/// every one that still shows the first identity's marker.
pub struct DifferentialAccessProbe {
    pattern: Regex,
    settle: Duration,
}

/// Outcome counters of a verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyStats {
    pub checked: usize,
    pub skipped: usize,
    pub findings: usize,
}

impl DifferentialAccessProbe {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            settle: Duration::from_secs(1),
        }
    }

    /// Pause after each navigation before reading the page.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Endpoints that are identity-scoped and showed the owner's marker.
    pub fn collect(&self, inventory: &Inventory) -> Vec<Endpoint> {
        inventory
            .endpoints
            .iter()
            .filter(|e| e.identity_scoped && e.owner_marked)
            .cloned()
            .collect()
    }

    /// Revisits `endpoints` through the surface of `session`. A finding is
    /// recorded only when the pattern matches; unreachable or unreadable
    /// pages are skipped.
    pub async fn verify<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        session: &Session,
        endpoints: &[Endpoint],
        collector: &mut FindingCollector,
        budget: &RunBudget,
    ) -> VerifyStats {
        let mut stats = VerifyStats::default();
        let identity = session.label();

        for endpoint in endpoints {
            if let Some(reason) = budget.exhausted() {
                warn!("Verification stopped early ({:?})", reason);
                break;
            }

            debug!("Checking {} as {}", endpoint.url, identity);
            if let Err(e) = surface.navigate(&endpoint.url).await {
                warn!("{}", ProbeError::navigation(&endpoint.url, e));
                stats.skipped += 1;
                continue;
            }
            tokio::time::sleep(self.settle).await;

            let source = match surface.page_source().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("{}", ProbeError::Analysis(format!("{}: {}", endpoint.url, e)));
                    stats.skipped += 1;
                    continue;
                }
            };
            stats.checked += 1;

            if let Some(m) = self.pattern.find(&source) {
                let fragment = excerpt(&source, m.start(), m.end(), 40);
                collector.record(Finding::idor(endpoint, identity, self.pattern.as_str(), fragment));
                stats.findings += 1;
            }
        }

        info!(
            "Verification as {}: {} checked, {} skipped, {} finding(s)",
            identity, stats.checked, stats.skipped, stats.findings
        );
        stats
    }
}
