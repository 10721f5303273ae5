use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single fetch attempt, classified for the retry policy.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("unreadable response body: {0}")]
    Body(String),
}

impl FetchError {
    /// Timeouts, connection failures, renderer hiccups and any non-2xx status
    /// are retried; CodeChef throttles with 403 as well as 429. A body that
    /// arrived but cannot be read will not change.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Body(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if e.is_body() || e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("{what} failed after {attempts} attempt(s): {source}")]
    TransientFetch {
        what: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("expected structure missing: {0}")]
    StructuralParse(String),
    #[error("malformed row: {0}")]
    MalformedRow(String),
    #[error("could not write {sink} output to {path:?}: {message}")]
    SinkWrite {
        sink: &'static str,
        path: PathBuf,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(FetchError::Timeout("render".into()).is_transient());
        assert!(FetchError::Render("tab crashed".into()).is_transient());
        assert!(FetchError::Status { status: 503, url: String::new() }.is_transient());
        assert!(FetchError::Status { status: 429, url: String::new() }.is_transient());
        assert!(FetchError::Status { status: 403, url: String::new() }.is_transient());
        assert!(FetchError::Status { status: 404, url: String::new() }.is_transient());
        assert!(!FetchError::Body("not json".into()).is_transient());
    }
}
