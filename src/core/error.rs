use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::types::Level;

/// Failures reported by a [`crate::scraping::session::SessionDriver`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("option '{value}' is not available in {control}")]
    OptionUnavailable { control: String, value: String },

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("element not found: {0}")]
    ElementMissing(String),

    #[error("{control} shows '{actual}', expected '{expected}'")]
    Desynchronized {
        control: String,
        expected: String,
        actual: String,
    },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine-level fault taxonomy.
///
/// Only `Startup` and `Config` abort a run; the rest are converted into a
/// skip decision at the leaf boundary.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("could not establish {level} selection '{value}': {source}")]
    Navigation {
        level: Level,
        value: String,
        #[source]
        source: SessionError,
    },

    #[error("no submit control found on the page")]
    NoSubmitControl,

    #[error("failed to persist {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("extraction failed: {0}")]
    Extraction(#[from] SessionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CrawlError {
    /// Whether the fault must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Startup(_) | CrawlError::Config(_))
    }

    /// Short label used in logs and the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlError::Startup(_) => "startup",
            CrawlError::Navigation { .. } => "navigation",
            CrawlError::NoSubmitControl => "no_submit_control",
            CrawlError::Persistence { .. } => "persistence",
            CrawlError::Extraction(_) => "extraction",
            CrawlError::Config(_) => "config",
        }
    }
}
