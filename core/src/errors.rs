use std::time::Duration;
use thiserror::Error;

/// Failures raised by a browsing surface while driving a page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The handle belongs to a page that is no longer current.
    #[error("stale element handle #{0}")]
    StaleElement(usize),

    #[error("invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("no page loaded")]
    NoPage,
}

/// Why a login attempt was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthFailure {
    #[error("login element missing: {0}")]
    MissingElement(String),

    #[error("submit failed: {0}")]
    SubmitFailed(String),

    #[error("login form still present after submit")]
    LoginFormStillPresent,

    #[error("success marker '{0}' not found after submit")]
    MarkerNotFound(String),
}

/// Error taxonomy of the probing engine.
///
/// Only `Auth`, `SessionConflict` and `InvalidTarget` stop a run; everything
/// else is logged by the caller and the affected item is skipped.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("authentication failed for '{identity}': {failure}")]
    Auth {
        identity: String,
        failure: AuthFailure,
    },

    #[error("session conflict: session for '{active}' is still open")]
    SessionConflict { active: String },

    #[error("session #{0} is not the active session")]
    SessionClosed(u64),

    #[error("navigation error at {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: SurfaceError,
    },

    #[error("analysis error: {0}")]
    Analysis(String),

    #[error("cleanup error: {0}")]
    Cleanup(String),

    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    #[error("payload catalog error: {0}")]
    Payload(String),
}

impl ProbeError {
    pub fn navigation(url: impl Into<String>, source: SurfaceError) -> Self {
        ProbeError::Navigation {
            url: url.into(),
            source,
        }
    }

    /// True for errors that must terminate the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Auth { .. }
                | ProbeError::SessionConflict { .. }
                | ProbeError::InvalidTarget(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
