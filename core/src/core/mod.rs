pub mod budget;
pub mod engine;
pub mod frontier;
pub mod result_aggregator;
pub mod session;

use serde::{Deserialize, Serialize};

/// What a finding claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    PotentialIdor,
    TimeBasedInjection,
    SyntaxErrorInjection,
    ResponseChanged,
}

impl FindingKind {
    pub fn confidence(&self) -> Confidence {
        match self {
            FindingKind::PotentialIdor
            | FindingKind::TimeBasedInjection
            | FindingKind::SyntaxErrorInjection => Confidence::Suspicious,
            FindingKind::ResponseChanged => Confidence::Weak,
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::PotentialIdor => write!(f, "Potential IDOR"),
            FindingKind::TimeBasedInjection => write!(f, "Time-based injection suspected"),
            FindingKind::SyntaxErrorInjection => write!(f, "Syntax-error injection suspected"),
            FindingKind::ResponseChanged => write!(f, "Response changed - possible vulnerability"),
        }
    }
}

/// How much a finding can be trusted without manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Suspicious,
    Weak,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Suspicious => write!(f, "suspicious"),
            Confidence::Weak => write!(f, "weak"),
        }
    }
}
