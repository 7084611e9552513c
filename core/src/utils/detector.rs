use std::time::Duration;

use crate::core::FindingKind;
use crate::utils::payload_catalog::{PayloadCatalog, PayloadCategory};

/// Elapsed time at or above which a time-based payload counts as a hit.
pub const DEFAULT_TIME_THRESHOLD: Duration = Duration::from_secs(5);

/// Outcome of one injection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    TimeBased { elapsed: Duration },
    SyntaxError { engine: &'static str, fragment: String },
    ResponseChanged { baseline_len: usize, response_len: usize },
    NoFinding,
}

impl Verdict {
    pub fn kind(&self) -> Option<FindingKind> {
        match self {
            Verdict::TimeBased { .. } => Some(FindingKind::TimeBasedInjection),
            Verdict::SyntaxError { .. } => Some(FindingKind::SyntaxErrorInjection),
            Verdict::ResponseChanged { .. } => Some(FindingKind::ResponseChanged),
            Verdict::NoFinding => None,
        }
    }
}

/// Classifies injection responses against a form's baseline.
///
/// Rules apply in order and the first hit wins:
/// 1. time-based payload with elapsed >= threshold
/// 2. a database error signature anywhere in the body
/// 3. any difference from the baseline body
pub struct ResponseClassifier<'a> {
    catalog: &'a PayloadCatalog,
    time_threshold: Duration,
}

impl<'a> ResponseClassifier<'a> {
    pub fn new(catalog: &'a PayloadCatalog, time_threshold: Duration) -> Self {
        Self {
            catalog,
            time_threshold,
        }
    }

    pub fn classify(
        &self,
        category: PayloadCategory,
        body: &str,
        baseline: &str,
        elapsed: Duration,
    ) -> Verdict {
        if category == PayloadCategory::TimeBased && elapsed >= self.time_threshold {
            return Verdict::TimeBased { elapsed };
        }

        if let Some(sig) = self.catalog.match_error_signature(body) {
            let fragment = sig
                .regex
                .find(body)
                .map(|m| excerpt(body, m.start(), m.end(), 60))
                .unwrap_or_default();
            return Verdict::SyntaxError {
                engine: sig.engine,
                fragment,
            };
        }

        if body != baseline {
            return Verdict::ResponseChanged {
                baseline_len: baseline.len(),
                response_len: body.len(),
            };
        }

        Verdict::NoFinding
    }
}

/// Slice of `text` around `[start, end)` widened by `context` bytes, snapped
/// to char boundaries.
pub fn excerpt(text: &str, start: usize, end: usize, context: usize) -> String {
    let mut from = start.saturating_sub(context);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + context).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].trim().to_string()
}
