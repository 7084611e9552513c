use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;

use crate::core::{Confidence, FindingKind};
use crate::modules::crawler::{Endpoint, Form};
use crate::utils::detector::Verdict;
use crate::utils::payload_catalog::Payload;
use crate::SinkRef;

/// Where a finding was observed. Always built from crawler output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Location {
    Endpoint {
        url: String,
    },
    FormField {
        page_url: String,
        action: String,
        form_index: usize,
        field: String,
    },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Endpoint { url } => write!(f, "{}", url),
            Location::FormField {
                page_url,
                form_index,
                field,
                ..
            } => write!(f, "{} [form #{} field: {}]", page_url, form_index, field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Evidence {
    PatternMatch { pattern: String, fragment: String },
    ErrorSignature { engine: String, fragment: String },
    Elapsed { millis: u64 },
    ContentDiff { baseline_len: usize, response_len: usize },
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::PatternMatch { pattern, fragment } => {
                write!(f, "pattern '{}' matched: \"{}\"", pattern, fragment)
            }
            Evidence::ErrorSignature { engine, fragment } => {
                write!(f, "{} error: \"{}\"", engine, fragment)
            }
            Evidence::Elapsed { millis } => write!(f, "response took {}ms", millis),
            Evidence::ContentDiff {
                baseline_len,
                response_len,
            } => write!(f, "body differs from baseline ({} -> {} bytes)", baseline_len, response_len),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub location: Location,
    pub kind: FindingKind,
    pub confidence: Confidence,
    pub evidence: Evidence,
    pub payload: Option<Payload>,
    /// Identity whose session produced the response.
    pub identity: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Finding {
    pub fn idor(endpoint: &Endpoint, identity: &str, pattern: &str, fragment: String) -> Self {
        let kind = FindingKind::PotentialIdor;
        Self {
            location: Location::Endpoint {
                url: endpoint.url.clone(),
            },
            kind,
            confidence: kind.confidence(),
            evidence: Evidence::PatternMatch {
                pattern: pattern.to_string(),
                fragment,
            },
            payload: None,
            identity: Some(identity.to_string()),
            observed_at: Utc::now(),
        }
    }

    /// Builds the finding for a classified injection attempt; `None` when the
    /// verdict is "no finding".
    pub fn injection(
        form: &Form,
        field: &str,
        payload: &Payload,
        verdict: &Verdict,
        identity: Option<&str>,
    ) -> Option<Self> {
        let kind = verdict.kind()?;
        let evidence = match verdict {
            Verdict::TimeBased { elapsed } => Evidence::Elapsed {
                millis: elapsed.as_millis() as u64,
            },
            Verdict::SyntaxError { engine, fragment } => Evidence::ErrorSignature {
                engine: engine.to_string(),
                fragment: fragment.clone(),
            },
            Verdict::ResponseChanged {
                baseline_len,
                response_len,
            } => Evidence::ContentDiff {
                baseline_len: *baseline_len,
                response_len: *response_len,
            },
            Verdict::NoFinding => return None,
        };
        Some(Self {
            location: Location::FormField {
                page_url: form.page_url.clone(),
                action: form.action.clone(),
                form_index: form.index,
                field: field.to_string(),
            },
            kind,
            confidence: kind.confidence(),
            evidence,
            payload: Some(payload.clone()),
            identity: identity.map(str::to_string),
            observed_at: Utc::now(),
        })
    }
}

/// Append-only store of findings.
///
/// Findings are kept in arrival order and never deduplicated: two payloads
/// hitting the same field are two findings.
pub struct FindingCollector {
    findings: Vec<Finding>,
    output: Option<File>,
    sink: SinkRef,
}

impl FindingCollector {
    pub fn new(sink: SinkRef) -> Self {
        Self {
            findings: Vec::new(),
            output: None,
            sink,
        }
    }

    /// Also appends every finding as a JSON line to `path`.
    pub fn with_output(sink: SinkRef, path: &str) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            findings: Vec::new(),
            output: Some(file),
            sink,
        })
    }

    pub fn record(&mut self, finding: Finding) {
        info!(
            "Finding: {} at {} ({}; {})",
            finding.kind, finding.location, finding.confidence, finding.evidence
        );
        self.sink.on_finding(&finding);

        if let Some(ref mut file) = self.output {
            match serde_json::to_string(&finding) {
                Ok(line) => {
                    if let Err(e) = writeln!(file, "{}", line) {
                        error!("Failed to write finding to output file: {}", e);
                    }
                }
                Err(e) => error!("Failed to serialize finding: {}", e),
            }
        }

        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Hands over everything recorded so far, in insertion order.
    pub fn drain(&mut self) -> Vec<Finding> {
        std::mem::take(&mut self.findings)
    }

    pub fn report_summary(findings: &[Finding], sink: &SinkRef) {
        if findings.is_empty() {
            sink.on_log("success", "[+] No findings.");
        } else {
            sink.on_log("warn", &format!("[+] {} finding(s):", findings.len()));
            for (i, f) in findings.iter().enumerate() {
                let payload = f
                    .payload
                    .as_ref()
                    .map(|p| format!(" (payload: {})", p.text))
                    .unwrap_or_default();
                sink.on_log(
                    "error",
                    &format!("  #{} {} -> {}{}", i + 1, f.kind, f.location, payload),
                );
            }
        }
    }
}
