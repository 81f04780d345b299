use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Failures of the page source (fetching, loading, navigating).
#[derive(Error, Debug)]
pub enum PageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Invalid URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No snapshot for {0}")]
    UnknownUrl(String),

    #[error("No page loaded")]
    NotLoaded,
}

/// Extraction failures. Everything except layout classification and page
/// errors is recovered locally by skipping the field or entry.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{field} not found (company index {index})")]
    NotFound { field: &'static str, index: usize },

    #[error("timed out after {:.1}s waiting for {what}", .waited.as_secs_f64())]
    Timeout { what: &'static str, waited: Duration },

    #[error("page content changed under company index {index} ({url})")]
    Stale { index: usize, url: String },

    #[error("no known layout detected on {url}")]
    LayoutClassification { url: String },

    #[error(transparent)]
    Page(#[from] PageError),
}

impl ExtractError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExtractError::NotFound { .. } | ExtractError::Timeout { .. } | ExtractError::Stale { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
}

/// A profile session that ended in `Failed`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("extraction failed in {state:?}: {source}")]
    Extract {
        state: SessionState,
        #[source]
        source: ExtractError,
    },

    #[error("persistence failed in {state:?}: {source}")]
    Store {
        state: SessionState,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    /// Persistence exhaustion ends the whole run; anything else only the profile.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, SessionError::Store { .. })
    }
}
