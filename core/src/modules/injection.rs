use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::budget::RunBudget;
use crate::core::result_aggregator::{Finding, FindingCollector};
use crate::core::session::Session;
use crate::errors::{ProbeError, Result};
use crate::modules::crawler::Form;
use crate::surface::{find_first, BrowsingSurface, ElementId, Locator, SUBMIT_CONTROLS};
use crate::utils::detector::{ResponseClassifier, DEFAULT_TIME_THRESHOLD};
use crate::utils::payload_catalog::{Payload, PayloadCatalog};

#[derive(Debug, Clone)]
pub struct InjectionOptions {
    pub time_threshold: Duration,
    /// Upper bound on waiting for the response page after submit.
    pub wait_timeout: Duration,
    /// Pause between two attempts.
    pub attempt_delay: Duration,
    /// Value typed into every field for the baseline submission.
    pub baseline_value: String,
}

impl Default for InjectionOptions {
    fn default() -> Self {
        Self {
            time_threshold: DEFAULT_TIME_THRESHOLD,
            wait_timeout: Duration::from_secs(10),
            attempt_delay: Duration::from_secs(1),
            baseline_value: "invalid".to_string(),
        }
    }
}

/// Per-form counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormReport {
    pub baseline_captured: bool,
    pub attempts: usize,
    pub skipped: usize,
    pub findings: usize,
}

/// Submits every catalog payload into every typeable field of a form and
/// classifies the responses against one baseline per form.
pub struct InjectionProbe {
    catalog: Arc<PayloadCatalog>,
    options: InjectionOptions,
}

impl InjectionProbe {
    pub fn new(catalog: Arc<PayloadCatalog>, options: InjectionOptions) -> Self {
        Self { catalog, options }
    }

    pub fn catalog(&self) -> &PayloadCatalog {
        &self.catalog
    }

    /// Number of attempts `test` makes against `form`.
    pub fn planned_attempts(&self, form: &Form) -> usize {
        form.typeable_fields().count() * self.catalog.len()
    }

    /// Loads the form's page fresh and returns the handle of the form.
    async fn locate_form<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        form: &Form,
    ) -> Result<ElementId> {
        surface
            .navigate(&form.page_url)
            .await
            .map_err(|e| ProbeError::navigation(&form.page_url, e))?;
        let forms = surface
            .find_elements(None, &Locator::tag("form"))
            .await
            .map_err(|e| ProbeError::Analysis(e.to_string()))?;
        forms.get(form.index).copied().ok_or_else(|| {
            ProbeError::Analysis(format!("form #{} no longer present on {}", form.index, form.page_url))
        })
    }

    async fn fill<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        form_el: ElementId,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let input = find_first(surface, Some(form_el), &Locator::name(field))
            .await
            .map_err(|e| ProbeError::Analysis(format!("field '{}': {}", field, e)))?;
        let typed = async {
            surface.clear(input).await?;
            surface.send_keys(input, value).await
        };
        typed
            .await
            .map_err(|e| ProbeError::Analysis(format!("field '{}': {}", field, e)))
    }

    /// Clicks the form's submit control and returns the response body and
    /// the time from click until the response page was ready.
    async fn submit_and_wait<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        form: &Form,
        form_el: ElementId,
    ) -> Result<(String, Duration)> {
        let submit = find_first(surface, Some(form_el), &Locator::css(SUBMIT_CONTROLS))
            .await
            .map_err(|e| ProbeError::Analysis(format!("submit control: {}", e)))?;

        let started = Instant::now();
        surface
            .click(submit)
            .await
            .map_err(|e| ProbeError::navigation(&form.action, e))?;
        surface
            .wait_until(&Locator::tag("body"), self.options.wait_timeout)
            .await
            .map_err(|e| ProbeError::navigation(&form.action, e))?;
        let elapsed = started.elapsed();

        let body = surface
            .page_source()
            .await
            .map_err(|e| ProbeError::Analysis(e.to_string()))?;
        Ok((body, elapsed))
    }

    /// Submits clearly invalid input into every typeable field once and
    /// returns the response body.
    pub async fn capture_baseline<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        form: &Form,
    ) -> Result<String> {
        let form_el = self.locate_form(surface, form).await?;
        for field in form.typeable_fields() {
            self.fill(surface, form_el, &field.name, &self.options.baseline_value)
                .await?;
        }
        let (body, _) = self.submit_and_wait(surface, form, form_el).await?;
        debug!("Baseline for {} form #{}: {} bytes", form.page_url, form.index, body.len());
        Ok(body)
    }

    /// Submits `payload` in `field`. The other typeable fields get the
    /// baseline value so the payload is the only difference from the baseline.
    async fn attempt<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        form: &Form,
        field: &str,
        payload: &Payload,
    ) -> Result<(String, Duration)> {
        let form_el = self.locate_form(surface, form).await?;
        for sibling in form.typeable_fields().filter(|f| f.name != field) {
            self.fill(surface, form_el, &sibling.name, &self.options.baseline_value)
                .await?;
        }
        self.fill(surface, form_el, field, &payload.text).await?;
        self.submit_and_wait(surface, form, form_el).await
    }

    /// Tests one form. The baseline is captured exactly once; if that fails
    /// the form is skipped. Each attempt starts from a freshly loaded page.
    pub async fn test<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        session: &Session,
        form: &Form,
        collector: &mut FindingCollector,
        budget: &RunBudget,
    ) -> FormReport {
        let mut report = FormReport::default();
        info!("Testing form #{} on {} (action {})", form.index, form.page_url, form.action);

        let baseline = match self.capture_baseline(surface, form).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Skipping form #{} on {}: baseline failed: {}", form.index, form.page_url, e);
                return report;
            }
        };
        report.baseline_captured = true;

        let classifier = ResponseClassifier::new(&self.catalog, self.options.time_threshold);
        for field in form.typeable_fields() {
            for payload in self.catalog.payloads() {
                if let Some(reason) = budget.exhausted() {
                    warn!("Injection stopped early ({:?})", reason);
                    return report;
                }
                report.attempts += 1;

                match self.attempt(surface, form, &field.name, payload).await {
                    Ok((body, elapsed)) => {
                        let verdict = classifier.classify(payload.category, &body, &baseline, elapsed);
                        debug!(
                            "{} [{}] in '{}' -> {:?} ({}ms)",
                            payload.text,
                            payload.category,
                            field.name,
                            verdict,
                            elapsed.as_millis()
                        );
                        if let Some(finding) =
                            Finding::injection(form, &field.name, payload, &verdict, session.identity())
                        {
                            collector.record(finding);
                            report.findings += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Skipping payload {:?} in field '{}': {}", payload.text, field.name, e);
                        report.skipped += 1;
                    }
                }

                tokio::time::sleep(self.options.attempt_delay).await;
            }
        }
        report
    }
}
