pub mod core;
pub mod errors;
pub mod http;
pub mod modules;
pub mod surface;
pub mod utils;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use crate::core::budget::{RunBudget, StopReason};
pub use crate::core::engine::{IdorPlan, InjectionPlan, ProbeEngine, RunSummary};
pub use crate::core::frontier::Traversal;
pub use crate::core::result_aggregator::{Evidence, Finding, FindingCollector, Location};
pub use crate::core::session::{Identity, LoginCheck, LoginPage, SessionManager, SessionTiming};
pub use crate::core::{Confidence, FindingKind};
pub use crate::errors::{AuthFailure, ProbeError, SurfaceError};
pub use crate::http::client::HttpClient;
pub use crate::surface::{BrowsingSurface, HtmlSurface};
pub use crate::utils::normalize_target;
pub use crate::utils::payload_catalog::{Payload, PayloadCatalog, PayloadCategory};

use crate::modules::crawler::CrawlOptions;
use crate::modules::injection::InjectionOptions;

/// Tunables shared by both probing modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    pub max_depth: u32,
    pub max_pages: usize,
    pub traversal: Traversal,
    pub login_settle_ms: u64,
    pub logout_settle_ms: u64,
    pub page_settle_ms: u64,
    /// Per-page fetch timeout and the post-submit wait bound.
    pub wait_timeout_secs: u64,
    pub time_threshold_secs: f64,
    pub attempt_delay_ms: u64,
    pub deadline_secs: Option<u64>,
    pub output: Option<String>,
    pub log_file: String,
    pub proxy: Option<String>,
    pub payloads: Option<String>,
    pub verbose: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 200,
            traversal: Traversal::BreadthFirst,
            login_settle_ms: 2000,
            logout_settle_ms: 1000,
            page_settle_ms: 1000,
            wait_timeout_secs: 10,
            time_threshold_secs: 5.0,
            attempt_delay_ms: 1000,
            deadline_secs: None,
            output: None,
            log_file: "dualprobe.log".to_string(),
            proxy: None,
            payloads: None,
            verbose: false,
        }
    }
}

impl ProbeConfig {
    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            login_settle: Duration::from_millis(self.login_settle_ms),
            logout_settle: Duration::from_millis(self.logout_settle_ms),
        }
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            traversal: self.traversal,
            page_settle: self.page_settle(),
        }
    }

    pub fn injection_options(&self) -> InjectionOptions {
        InjectionOptions {
            time_threshold: Duration::from_secs_f64(self.time_threshold_secs.max(0.0)),
            wait_timeout: self.wait_timeout(),
            attempt_delay: Duration::from_millis(self.attempt_delay_ms),
            ..InjectionOptions::default()
        }
    }

    pub fn budget(&self) -> RunBudget {
        match self.deadline_secs {
            Some(secs) => RunBudget::with_deadline(Duration::from_secs(secs)),
            None => RunBudget::unlimited(),
        }
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|p| !p.is_empty())
    }
}

/// Output abstraction for the probing pipeline.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Sink that drops everything. Used by library callers and tests.
pub struct SilentSink;

impl ScanEventSink for SilentSink {
    fn on_log(&self, _level: &str, _message: &str) {}
    fn on_finding(&self, _finding: &Finding) {}
    fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
}

/// Terminal output sink for CLI usage.
pub struct ConsoleSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn println(&self, text: &str) {
        use std::io::Write;
        let guard = self.bar.lock().ok();
        match guard.as_ref().and_then(|g| g.as_ref()) {
            Some(bar) => bar.println(text),
            None => {
                print!("{}\r\n", text);
                std::io::stdout().flush().ok();
            }
        }
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        self.println(&colored);
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        self.println(&format!(
            "\n{} {} ({})",
            "[+]".green().bold(),
            finding.kind.to_string().red().bold(),
            finding.confidence
        ));
        self.println(&format!("    Location: {}", finding.location.to_string().white()));
        if let Some(ref payload) = finding.payload {
            self.println(&format!(
                "    Payload:  {} [{}]",
                payload.text.bright_yellow(),
                payload.category
            ));
        }
        if let Some(ref identity) = finding.identity {
            self.println(&format!("    Identity: {}", identity.blue()));
        }
        self.println(&format!("    Evidence: {}", finding.evidence.to_string().dimmed()));
        self.println(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        let mut guard = match self.bar.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if total == 0 {
            return;
        }
        let bar = guard.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] {msg} [{bar:30.cyan/blue}] {pos}/{len}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            bar
        });
        bar.set_length(total as u64);
        bar.set_message(phase.to_string());
        bar.set_position(current as u64);
        if current >= total {
            bar.finish_and_clear();
            *guard = None;
        }
    }
}
